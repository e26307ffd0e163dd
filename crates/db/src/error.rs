//! Error types for the document store.

use thiserror::Error;

/// Errors raised by store commands, sessions and change streams.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Another transaction holds the write lock on the target document and
    /// did not release it within the lock timeout.
    #[error("write conflict on document {id} in '{collection}'")]
    WriteConflict { collection: String, id: String },

    #[error("collection '{0}' does not exist")]
    NamespaceNotFound(String),

    #[error("duplicate key {id} in '{collection}'")]
    DuplicateKey { collection: String, id: String },

    #[error("document has no '_id' field")]
    MissingId,

    #[error("cannot apply {operator} to field '{field}'")]
    InvalidUpdate {
        field: String,
        operator: &'static str,
    },

    #[error("a transaction is already in progress on this session")]
    TransactionInProgress,

    #[error("no transaction in progress on this session")]
    NoTransaction,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The change stream fell behind its buffer and cannot be resumed.
    #[error("change stream fell behind by {0} events")]
    ChangeStreamLagged(u64),
}

impl StoreError {
    /// Whether retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::WriteConflict { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_write_conflicts_are_transient() {
        let conflict = StoreError::WriteConflict {
            collection: "books".to_string(),
            id: "b1".to_string(),
        };
        assert!(conflict.is_transient());
        assert!(!StoreError::Unavailable("down".to_string()).is_transient());
        assert!(!StoreError::NamespaceNotFound("order".to_string()).is_transient());
    }
}
