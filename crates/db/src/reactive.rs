//! Async facade over the blocking store.
//!
//! Every command is offloaded to tokio's blocking pool, so awaiting one never
//! stalls the runtime while a writer waits on a document lock.

use std::sync::Arc;

use crate::change_stream::ChangeStream;
use crate::collection::Collection;
use crate::document::{Document, Filter, InsertOneResult, Update, UpdateResult};
use crate::error::{StoreError, StoreResult};
use crate::session::{ClientSession, SessionInner, TransactionStatus};
use crate::store::DocumentStore;

#[derive(Clone, Debug)]
pub struct ReactiveClient {
    store: DocumentStore,
}

impl ReactiveClient {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    pub fn collection(&self, name: &str) -> ReactiveCollection {
        ReactiveCollection {
            inner: self.store.collection(name),
        }
    }

    pub fn start_session(&self) -> ReactiveSession {
        ReactiveSession {
            session: self.store.start_session(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReactiveCollection {
    inner: Collection,
}

impl ReactiveCollection {
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn find(&self, filter: Filter) -> StoreResult<Vec<Document>> {
        let collection = self.inner.clone();
        offload(move || collection.find(&filter)).await
    }

    pub async fn find_one(&self, filter: Filter) -> StoreResult<Option<Document>> {
        let collection = self.inner.clone();
        offload(move || collection.find_one(&filter)).await
    }

    pub async fn insert_one(&self, document: Document) -> StoreResult<InsertOneResult> {
        let collection = self.inner.clone();
        offload(move || collection.insert_one(document)).await
    }

    pub async fn update_one(&self, filter: Filter, update: Update) -> StoreResult<UpdateResult> {
        let collection = self.inner.clone();
        offload(move || collection.update_one(&filter, &update)).await
    }

    pub async fn find_with_session(
        &self,
        session: &ReactiveSession,
        filter: Filter,
    ) -> StoreResult<Vec<Document>> {
        let collection = self.inner.clone();
        let session = session.shared();
        offload(move || collection.find_in(Some(&*session), &filter)).await
    }

    pub async fn insert_one_with_session(
        &self,
        session: &ReactiveSession,
        document: Document,
    ) -> StoreResult<InsertOneResult> {
        let collection = self.inner.clone();
        let session = session.shared();
        offload(move || collection.insert_in(Some(&*session), document)).await
    }

    pub async fn update_one_with_session(
        &self,
        session: &ReactiveSession,
        filter: Filter,
        update: Update,
    ) -> StoreResult<UpdateResult> {
        let collection = self.inner.clone();
        let session = session.shared();
        offload(move || collection.update_in(Some(&*session), &filter, &update)).await
    }

    pub fn watch(&self) -> ChangeStream {
        self.inner.watch()
    }
}

/// Session whose commit and abort are awaited instead of blocking.
///
/// Dropping it aborts an open transaction, same as [`ClientSession`].
#[derive(Debug)]
pub struct ReactiveSession {
    session: ClientSession,
}

impl ReactiveSession {
    pub fn id(&self) -> u64 {
        self.session.id()
    }

    pub fn status(&self) -> TransactionStatus {
        self.session.status()
    }

    /// Starting a transaction is local to the session and does not block.
    pub fn start_transaction(&self) -> StoreResult<()> {
        self.session.start_transaction()
    }

    pub async fn commit_transaction(&self) -> StoreResult<()> {
        let session = self.shared();
        offload(move || session.commit_transaction()).await
    }

    pub async fn abort_transaction(&self) -> StoreResult<()> {
        let session = self.shared();
        offload(move || session.abort_transaction()).await
    }

    fn shared(&self) -> Arc<SessionInner> {
        Arc::clone(self.session.inner())
    }
}

async fn offload<T, F>(work: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| StoreError::Unavailable(format!("store worker failed: {error}")))?
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn client() -> ReactiveClient {
        let store = DocumentStore::builder()
            .lock_timeout(Duration::from_secs(5))
            .build();
        store
            .collection("books")
            .insert_one(doc(json!({"_id": "b1", "available": 1})))
            .unwrap();
        store.create_collection("order");
        ReactiveClient::new(store)
    }

    #[tokio::test]
    async fn transaction_round_trip() {
        let client = client();
        let books = client.collection("books");
        let orders = client.collection("order");
        let session = client.start_session();
        session.start_transaction().unwrap();

        orders
            .insert_one_with_session(&session, doc(json!({"_id": "o1"})))
            .await
            .unwrap();
        let result = books
            .update_one_with_session(
                &session,
                Filter::by_id("b1").gt("available", 0),
                Update::new().inc("available", -1),
            )
            .await
            .unwrap();
        assert_eq!(result.modified_count, 1);
        assert!(orders.find(Filter::new()).await.unwrap().is_empty());
        assert_eq!(
            orders.find_with_session(&session, Filter::new()).await.unwrap().len(),
            1
        );

        session.commit_transaction().await.unwrap();
        assert_eq!(session.status(), TransactionStatus::Committed);
        assert_eq!(orders.find(Filter::new()).await.unwrap().len(), 1);
        let book = books.find_one(Filter::by_id("b1")).await.unwrap().unwrap();
        assert_eq!(book["available"], json!(0));
    }

    #[tokio::test]
    async fn dropping_the_session_aborts_a_blocked_writer() {
        let client = client();
        let books = client.collection("books");

        let holder = client.start_session();
        holder.start_transaction().unwrap();
        books
            .update_one_with_session(
                &holder,
                Filter::by_id("b1"),
                Update::new().set("reserved", true),
            )
            .await
            .unwrap();

        let waiter = client.start_session();
        waiter.start_transaction().unwrap();
        let blocked = books.update_one_with_session(
            &waiter,
            Filter::by_id("b1"),
            Update::new().inc("available", -1),
        );
        let timed_out = tokio::time::timeout(Duration::from_millis(50), blocked).await;
        assert!(timed_out.is_err(), "writer must wait for the holder");

        drop(waiter);
        holder.abort_transaction().await.unwrap();

        let book = books.find_one(Filter::by_id("b1")).await.unwrap().unwrap();
        assert_eq!(book["available"], json!(1));
        assert!(book.get("reserved").is_none());
    }
}
