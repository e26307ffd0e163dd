//! Declarative transaction demarcation.

use crate::error::StoreError;
use crate::session::ClientSession;
use crate::store::DocumentStore;

/// Runs a unit of work inside a fresh session and transaction.
///
/// The transaction commits when the callback returns `Ok` and rolls back on
/// `Err`. A failed commit is reported as the callback's error type.
#[derive(Clone, Debug)]
pub struct TransactionTemplate {
    store: DocumentStore,
}

impl TransactionTemplate {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    pub fn execute<T, E, F>(&self, work: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&ClientSession) -> Result<T, E>,
    {
        let session = self.store.start_session();
        session.start_transaction()?;
        match work(&session) {
            Ok(value) => {
                session.commit_transaction()?;
                Ok(value)
            }
            Err(error) => {
                if let Err(abort) = session.abort_transaction() {
                    tracing::warn!(session = session.id(), error = %abort, "rollback failed");
                }
                Err(error)
            }
        }
    }
}
