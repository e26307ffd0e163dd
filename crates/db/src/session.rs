//! Client sessions and their transaction lifecycle.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use crate::error::{StoreError, StoreResult};
use crate::listener::CommandName;
use crate::store::{DocumentStore, TxnNumber};

/// Where a session's current (or last) transaction stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    NotStarted,
    InProgress,
    Committed,
    Aborted,
}

/// A session binds a sequence of commands to one transaction.
///
/// Dropping a session whose transaction is still in progress aborts that
/// transaction, so every exit path of the owner releases it.
pub struct ClientSession {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    id: u64,
    store: DocumentStore,
    state: Mutex<SessionState>,
}

struct SessionState {
    status: TransactionStatus,
    txn: Option<TxnNumber>,
}

impl ClientSession {
    pub(crate) fn new(store: DocumentStore, id: u64) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                store,
                state: Mutex::new(SessionState {
                    status: TransactionStatus::NotStarted,
                    txn: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.inner.status()
    }

    pub fn start_transaction(&self) -> StoreResult<()> {
        self.inner.start_transaction()
    }

    /// On failure the transaction stays in progress; abort it or drop the session.
    pub fn commit_transaction(&self) -> StoreResult<()> {
        self.inner.commit_transaction()
    }

    pub fn abort_transaction(&self) -> StoreResult<()> {
        self.inner.abort_transaction()
    }

    pub(crate) fn inner(&self) -> &Arc<SessionInner> {
        &self.inner
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if self.inner.status() != TransactionStatus::InProgress {
            return;
        }
        tracing::debug!(
            session = self.inner.id,
            "session released with an open transaction, aborting"
        );
        if let Err(error) = self.inner.abort_transaction() {
            tracing::warn!(session = self.inner.id, %error, "abort on session release failed");
        }
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.inner.id)
            .field("status", &self.inner.status())
            .finish()
    }
}

impl SessionInner {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    /// The transaction commands on this session must run in.
    pub(crate) fn transaction(&self) -> StoreResult<TxnNumber> {
        self.state.lock().txn.ok_or(StoreError::NoTransaction)
    }

    pub(crate) fn start_transaction(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.txn.is_some() {
            return Err(StoreError::TransactionInProgress);
        }
        state.txn = Some(self.store.shared().begin());
        state.status = TransactionStatus::InProgress;
        Ok(())
    }

    pub(crate) fn commit_transaction(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        let number = state.txn.ok_or(StoreError::NoTransaction)?;
        let shared = self.store.shared();
        shared.run(
            CommandName::CommitTransaction,
            None,
            Some(self.id),
            || json!({ "commitTransaction": 1, "txnNumber": number }),
            || shared.commit(number),
        )?;
        state.txn = None;
        state.status = TransactionStatus::Committed;
        Ok(())
    }

    pub(crate) fn abort_transaction(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        let number = state.txn.ok_or(StoreError::NoTransaction)?;
        let shared = self.store.shared();
        let outcome = shared.run(
            CommandName::AbortTransaction,
            None,
            Some(self.id),
            || json!({ "abortTransaction": 1, "txnNumber": number }),
            || {
                shared.abort(number);
                Ok(())
            },
        );
        // Locks are released even when the abort command itself reported a failure.
        if outcome.is_err() {
            shared.abort(number);
        }
        state.txn = None;
        state.status = TransactionStatus::Aborted;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Filter, Update};
    use crate::fail_point::FailPoint;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn store_with_book(stock: i64) -> DocumentStore {
        let store = DocumentStore::new();
        store
            .collection("books")
            .insert_one(doc(json!({"_id": "b1", "available": stock})))
            .unwrap();
        store.create_collection("order");
        store
    }

    #[test]
    fn status_follows_the_transaction_lifecycle() {
        let store = store_with_book(1);
        let session = store.start_session();
        assert_eq!(session.status(), TransactionStatus::NotStarted);

        session.start_transaction().unwrap();
        assert_eq!(session.status(), TransactionStatus::InProgress);
        assert_eq!(
            session.start_transaction(),
            Err(StoreError::TransactionInProgress)
        );

        session.commit_transaction().unwrap();
        assert_eq!(session.status(), TransactionStatus::Committed);
        assert_eq!(session.commit_transaction(), Err(StoreError::NoTransaction));

        session.start_transaction().unwrap();
        session.abort_transaction().unwrap();
        assert_eq!(session.status(), TransactionStatus::Aborted);
    }

    #[test]
    fn dropping_an_open_session_rolls_back() {
        let store = store_with_book(1);
        {
            let session = store.start_session();
            session.start_transaction().unwrap();
            store
                .collection("order")
                .insert_one_with_session(&session, doc(json!({"_id": "o1"})))
                .unwrap();
            store
                .collection("books")
                .update_one_with_session(
                    &session,
                    &Filter::by_id("b1"),
                    &Update::new().inc("available", -1),
                )
                .unwrap();
            assert_eq!(store.active_transactions(), 1);
        }
        assert_eq!(store.active_transactions(), 0);
        assert!(store.collection("order").find(&Filter::new()).unwrap().is_empty());
        let book = store.collection("books").find_one(&Filter::by_id("b1")).unwrap();
        assert_eq!(book.unwrap()["available"], json!(1));
    }

    #[test]
    fn failed_commit_keeps_the_transaction_open_until_aborted() {
        let store = store_with_book(1);
        store.configure_fail_point(FailPoint::new(
            CommandName::CommitTransaction,
            StoreError::Unavailable("primary stepped down".to_string()),
            1,
        ));
        let session = store.start_session();
        session.start_transaction().unwrap();
        assert!(session.commit_transaction().is_err());
        assert_eq!(session.status(), TransactionStatus::InProgress);

        session.abort_transaction().unwrap();
        assert_eq!(store.active_transactions(), 0);
    }

    #[test]
    fn abort_releases_locks_even_when_the_command_fails() {
        let store = store_with_book(1);
        store.configure_fail_point(FailPoint::new(
            CommandName::AbortTransaction,
            StoreError::Unavailable("network blip".to_string()),
            1,
        ));
        let session = store.start_session();
        session.start_transaction().unwrap();
        store
            .collection("books")
            .update_one_with_session(
                &session,
                &Filter::by_id("b1"),
                &Update::new().inc("available", -1),
            )
            .unwrap();

        assert!(session.abort_transaction().is_err());
        assert_eq!(session.status(), TransactionStatus::Aborted);
        let result = store
            .collection("books")
            .update_one(&Filter::by_id("b1"), &Update::new().inc("available", 1))
            .unwrap();
        assert_eq!(result.modified_count, 1);
    }
}
