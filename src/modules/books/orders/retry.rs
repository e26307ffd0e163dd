use std::sync::Arc;
use std::time::Duration;

use bookstore_kernel::settings::RetrySettings;

use super::{OrderService, PurchaseError};
use crate::modules::books::models::{Book, Customer, Order};

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Pause after the given failed attempt, counted from zero.
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

/// Re-runs the whole purchase while the store reports a transient conflict.
///
/// Each attempt evaluates stock afresh; a sell-out is returned at once.
pub struct RetryingOrderService {
    inner: Arc<dyn OrderService>,
    config: RetryConfig,
}

impl RetryingOrderService {
    pub fn new(inner: Arc<dyn OrderService>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

impl OrderService for RetryingOrderService {
    fn buy(&self, customer: &Customer, book: &Book) -> Result<Order, PurchaseError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.buy(customer, book) {
                Err(PurchaseError::Store(error)) if error.is_transient() => {
                    if attempt >= max_attempts {
                        tracing::warn!(book = %book.id, attempts = attempt, %error, "giving up on purchase");
                        return Err(PurchaseError::RetriesExhausted {
                            attempts: attempt,
                            source: error,
                        });
                    }
                    let delay = self.config.delay_for(attempt - 1);
                    tracing::debug!(
                        book = %book.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "transient conflict, retrying purchase"
                    );
                    std::thread::sleep(delay);
                }
                outcome => return outcome,
            }
        }
    }
}
