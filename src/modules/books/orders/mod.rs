//! Interchangeable ways to sell one copy of a book.
//!
//! Every strategy honours the same contract: on success the stock of the book
//! dropped by exactly one and exactly one order for it is recorded; on
//! [`PurchaseError::SoldOut`] the store is left as it was.

mod atomic;
mod managed;
mod native;
mod reactive;
mod retry;

use std::sync::Arc;

use bookstore_db::{DocumentStore, Filter, StoreError, Update};
use bookstore_kernel::settings::{OrderSettings, OrderStrategy};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::models::{Book, Customer, Order, STOCK_FIELD};

pub use atomic::AtomicOrderService;
pub use managed::TransactionalOrderService;
pub use native::NativeTransactionalOrderService;
pub use reactive::ReactiveOrderService;
pub use retry::{RetryConfig, RetryingOrderService};

/// Blocking purchase of a single copy.
pub trait OrderService: Send + Sync {
    fn buy(&self, customer: &Customer, book: &Book) -> Result<Order, PurchaseError>;
}

#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("book '{}' is sold out", .0.id)]
    SoldOut(Book),

    #[error("purchase was cancelled before it completed")]
    Cancelled,

    #[error("purchase still conflicting after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("purchase worker failed")]
    Worker(#[from] tokio::task::JoinError),
}

impl PurchaseError {
    /// Whether running the same purchase again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PurchaseError::Store(error) if error.is_transient())
    }
}

/// Matches `book` only while at least one copy is left.
pub(crate) fn in_stock(book: &Book) -> Filter {
    Filter::by_id(book.id.as_str()).gt(STOCK_FIELD, 0)
}

pub(crate) fn take_one() -> Update {
    Update::new().inc(STOCK_FIELD, -1)
}

/// The purchase implementation chosen at startup.
#[derive(Clone)]
pub enum PurchaseStrategy {
    Atomic(Arc<AtomicOrderService>),
    NativeTransaction(Arc<NativeTransactionalOrderService>),
    ManagedTransaction(Arc<TransactionalOrderService>),
    ReactiveTransaction(ReactiveOrderService),
    Retrying(Arc<RetryingOrderService>),
}

impl PurchaseStrategy {
    /// `shutdown` cancels in-flight reactive purchases.
    pub fn from_settings(
        settings: &OrderSettings,
        store: &DocumentStore,
        shutdown: CancellationToken,
    ) -> Self {
        match settings.strategy {
            OrderStrategy::Atomic => Self::Atomic(Arc::new(AtomicOrderService::new(store))),
            OrderStrategy::NativeTransaction => {
                Self::NativeTransaction(Arc::new(NativeTransactionalOrderService::new(store)))
            }
            OrderStrategy::ManagedTransaction => {
                Self::ManagedTransaction(Arc::new(TransactionalOrderService::new(store)))
            }
            OrderStrategy::ReactiveTransaction => {
                Self::ReactiveTransaction(ReactiveOrderService::new(store, shutdown))
            }
            OrderStrategy::RetryableTransaction => Self::Retrying(Arc::new(
                RetryingOrderService::new(
                    Arc::new(TransactionalOrderService::new(store)),
                    RetryConfig::from(&settings.retry),
                ),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Atomic(_) => "atomic",
            Self::NativeTransaction(_) => "native-transaction",
            Self::ManagedTransaction(_) => "managed-transaction",
            Self::ReactiveTransaction(_) => "reactive-transaction",
            Self::Retrying(_) => "retryable-transaction",
        }
    }

    /// Runs the purchase without blocking the calling task.
    pub async fn buy(&self, customer: Customer, book: Book) -> Result<Order, PurchaseError> {
        let service: Arc<dyn OrderService> = match self {
            Self::ReactiveTransaction(service) => return service.buy(&customer, &book).await,
            Self::Atomic(service) => service.clone(),
            Self::NativeTransaction(service) => service.clone(),
            Self::ManagedTransaction(service) => service.clone(),
            Self::Retrying(service) => service.clone(),
        };
        tokio::task::spawn_blocking(move || service.buy(&customer, &book)).await?
    }
}

impl std::fmt::Debug for PurchaseStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PurchaseStrategy").field(&self.name()).finish()
    }
}
