//! Logs every new order as it is committed.

use bookstore_db::{ChangeStream, DocumentStore, OperationType, StoreError};
use tokio_util::sync::CancellationToken;

use super::models::ORDER_COLLECTION;

/// Insert events on the order collection.
pub fn order_inserts(store: &DocumentStore) -> ChangeStream {
    store
        .collection(ORDER_COLLECTION)
        .watch()
        .operation(OperationType::Insert)
}

/// Logs each event of `stream` until `shutdown` fires or the stream ends.
///
/// Returns how many events were observed. A failing stream is not reopened;
/// its error is returned.
pub async fn watch_orders(
    mut stream: ChangeStream,
    shutdown: CancellationToken,
) -> Result<u64, StoreError> {
    tracing::info!(collection = stream.collection(), "watching for new orders");
    let mut observed = 0;

    loop {
        // Events already committed are logged before shutdown is honoured.
        let next = tokio::select! {
            biased;
            next = stream.next() => next,
            _ = shutdown.cancelled() => break,
        };

        match next {
            Some(Ok(event)) => {
                observed += 1;
                match serde_json::to_string(&event) {
                    Ok(payload) => tracing::info!(
                        target: "bookstore::orders",
                        resume_token = event.resume_token,
                        %payload,
                        "order received"
                    ),
                    Err(error) => tracing::warn!(
                        target: "bookstore::orders",
                        resume_token = event.resume_token,
                        %error,
                        "order received but could not be rendered"
                    ),
                }
            }
            Some(Err(error)) => {
                tracing::warn!(target: "bookstore::orders", %error, "order stream failed");
                return Err(error);
            }
            None => break,
        }
    }

    tracing::info!(observed, "stopped watching orders");
    Ok(observed)
}
