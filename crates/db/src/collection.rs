//! Blocking collection handle.

use serde_json::json;

use crate::change_stream::ChangeStream;
use crate::document::{Document, Filter, InsertOneResult, Update, UpdateResult};
use crate::error::StoreResult;
use crate::listener::CommandName;
use crate::session::{ClientSession, SessionInner};
use crate::store::DocumentStore;

/// Named collection of a [`DocumentStore`].
///
/// Plain methods run outside any transaction. The `*_with_session` variants
/// run inside the session's transaction and fail with
/// [`StoreError::NoTransaction`](crate::StoreError::NoTransaction) when none is
/// in progress.
#[derive(Clone, Debug)]
pub struct Collection {
    store: DocumentStore,
    name: String,
}

impl Collection {
    pub(crate) fn new(store: DocumentStore, name: &str) -> Self {
        Self {
            store,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn find(&self, filter: &Filter) -> StoreResult<Vec<Document>> {
        self.find_in(None, filter)
    }

    pub fn find_one(&self, filter: &Filter) -> StoreResult<Option<Document>> {
        Ok(self.find(filter)?.into_iter().next())
    }

    /// Creates the collection on first insert.
    pub fn insert_one(&self, document: Document) -> StoreResult<InsertOneResult> {
        self.insert_in(None, document)
    }

    pub fn update_one(&self, filter: &Filter, update: &Update) -> StoreResult<UpdateResult> {
        self.update_in(None, filter, update)
    }

    pub fn delete_many(&self, filter: &Filter) -> StoreResult<u64> {
        let shared = self.store.shared();
        shared.run(
            CommandName::Delete,
            Some(&self.name),
            None,
            || json!({ "delete": self.name, "deletes": [{ "q": filter.to_value(), "limit": 0 }] }),
            || shared.delete(&self.name, filter),
        )
    }

    pub fn find_with_session(
        &self,
        session: &ClientSession,
        filter: &Filter,
    ) -> StoreResult<Vec<Document>> {
        self.find_in(Some(session.inner()), filter)
    }

    pub fn find_one_with_session(
        &self,
        session: &ClientSession,
        filter: &Filter,
    ) -> StoreResult<Option<Document>> {
        Ok(self.find_with_session(session, filter)?.into_iter().next())
    }

    /// The collection must already exist.
    pub fn insert_one_with_session(
        &self,
        session: &ClientSession,
        document: Document,
    ) -> StoreResult<InsertOneResult> {
        self.insert_in(Some(session.inner()), document)
    }

    pub fn update_one_with_session(
        &self,
        session: &ClientSession,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateResult> {
        self.update_in(Some(session.inner()), filter, update)
    }

    /// Opens a change stream over committed writes to this collection.
    pub fn watch(&self) -> ChangeStream {
        self.store.watch(&self.name)
    }

    pub(crate) fn find_in(
        &self,
        session: Option<&SessionInner>,
        filter: &Filter,
    ) -> StoreResult<Vec<Document>> {
        let shared = self.store.shared();
        shared.run(
            CommandName::Find,
            Some(&self.name),
            session.map(SessionInner::id),
            || json!({ "find": self.name, "filter": filter.to_value() }),
            || {
                let txn = session.map(SessionInner::transaction).transpose()?;
                shared.find(&self.name, filter, txn)
            },
        )
    }

    pub(crate) fn insert_in(
        &self,
        session: Option<&SessionInner>,
        document: Document,
    ) -> StoreResult<InsertOneResult> {
        let shared = self.store.shared();
        shared.run(
            CommandName::Insert,
            Some(&self.name),
            session.map(SessionInner::id),
            || json!({ "insert": self.name, "documents": [&document] }),
            || {
                let txn = session.map(SessionInner::transaction).transpose()?;
                shared.insert(&self.name, document.clone(), txn)
            },
        )
    }

    pub(crate) fn update_in(
        &self,
        session: Option<&SessionInner>,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateResult> {
        let shared = self.store.shared();
        shared.run(
            CommandName::Update,
            Some(&self.name),
            session.map(SessionInner::id),
            || {
                json!({
                    "update": self.name,
                    "updates": [{ "q": filter.to_value(), "u": update.to_value() }],
                })
            },
            || {
                let txn = session.map(SessionInner::transaction).transpose()?;
                shared.update(&self.name, filter, update, txn)
            },
        )
    }
}
