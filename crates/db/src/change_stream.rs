//! Change streams over committed writes.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::document::Document;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

/// One committed write, published after the write became visible.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Strictly increasing across the whole store.
    pub resume_token: u64,
    pub operation_type: OperationType,
    /// Collection the write targeted.
    pub ns: String,
    pub document_key: Value,
    /// Document as of the write; absent for deletes.
    pub full_document: Option<Document>,
}

/// Lazy, infinite sequence of change events for one collection.
///
/// The stream cannot be restarted: after it reports an error or the store
/// goes away, [`next`](ChangeStream::next) keeps returning `None`.
#[derive(Debug)]
pub struct ChangeStream {
    receiver: broadcast::Receiver<ChangeEvent>,
    collection: String,
    operations: Vec<OperationType>,
    finished: bool,
}

impl ChangeStream {
    pub(crate) fn new(receiver: broadcast::Receiver<ChangeEvent>, collection: String) -> Self {
        Self {
            receiver,
            collection,
            operations: Vec::new(),
            finished: false,
        }
    }

    /// Restricts the stream to the given operation kind. May be called more
    /// than once to accept several kinds.
    pub fn operation(mut self, operation: OperationType) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Waits for the next matching event.
    pub async fn next(&mut self) -> Option<StoreResult<ChangeEvent>> {
        while !self.finished {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.finished = true;
                    return Some(Err(StoreError::ChangeStreamLagged(missed)));
                }
                Err(broadcast::error::RecvError::Closed) => self.finished = true,
            }
        }
        None
    }

    fn accepts(&self, event: &ChangeEvent) -> bool {
        event.ns == self.collection
            && (self.operations.is_empty() || self.operations.contains(&event.operation_type))
    }
}
