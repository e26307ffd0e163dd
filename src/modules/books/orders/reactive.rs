use bookstore_db::{DocumentStore, ReactiveClient, ReactiveSession};
use tokio_util::sync::CancellationToken;

use super::{in_stock, take_one, PurchaseError};
use crate::modules::books::models::{Book, Customer, Order, BOOKS_COLLECTION, ORDER_COLLECTION};

/// Sells a copy through a non-blocking pipeline over the reactive client.
///
/// Commit and rollback follow the pipeline's outcome. Cancelling the purchase,
/// through its own token or the shutdown token, takes the rollback path.
#[derive(Clone)]
pub struct ReactiveOrderService {
    client: ReactiveClient,
    shutdown: CancellationToken,
}

impl ReactiveOrderService {
    pub fn new(store: &DocumentStore, shutdown: CancellationToken) -> Self {
        Self {
            client: ReactiveClient::new(store.clone()),
            shutdown,
        }
    }

    pub async fn buy(&self, customer: &Customer, book: &Book) -> Result<Order, PurchaseError> {
        self.buy_until(customer, book, &CancellationToken::new())
            .await
    }

    /// Like [`buy`](Self::buy), abandoned and rolled back once `cancel` fires.
    pub async fn buy_until(
        &self,
        customer: &Customer,
        book: &Book,
        cancel: &CancellationToken,
    ) -> Result<Order, PurchaseError> {
        let session = self.client.start_session();
        session.start_transaction()?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PurchaseError::Cancelled),
            _ = self.shutdown.cancelled() => Err(PurchaseError::Cancelled),
            outcome = self.place(&session, customer, book) => outcome,
        };

        match outcome {
            Ok(order) => {
                session.commit_transaction().await?;
                Ok(order)
            }
            Err(error) => {
                if let Err(abort) = session.abort_transaction().await {
                    tracing::warn!(session = session.id(), error = %abort, "rollback failed");
                }
                if matches!(error, PurchaseError::Cancelled) {
                    tracing::info!(book = %book.id, "purchase cancelled and rolled back");
                }
                Err(error)
            }
        }
    }

    async fn place(
        &self,
        session: &ReactiveSession,
        customer: &Customer,
        book: &Book,
    ) -> Result<Order, PurchaseError> {
        let order = Order::new(customer, book);
        self.client
            .collection(ORDER_COLLECTION)
            .insert_one_with_session(session, order.to_document())
            .await?;

        let result = self
            .client
            .collection(BOOKS_COLLECTION)
            .update_one_with_session(session, in_stock(book), take_one())
            .await?;
        if result.modified_count == 0 {
            return Err(PurchaseError::SoldOut(book.clone()));
        }
        Ok(order)
    }
}
