//! The shared store state and the command implementations behind
//! [`Collection`](crate::Collection) and [`ClientSession`](crate::ClientSession).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::change_stream::{ChangeEvent, ChangeStream, OperationType};
use crate::collection::Collection;
use crate::document::{id_key, Document, Filter, InsertOneResult, Update, UpdateResult, ID_FIELD};
use crate::error::{StoreError, StoreResult};
use crate::fail_point::FailPoint;
use crate::listener::{
    CommandFailedEvent, CommandListener, CommandName, CommandStartedEvent, CommandSucceededEvent,
};
use crate::session::ClientSession;

pub(crate) type TxnNumber = u64;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_CHANGE_STREAM_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// How long a writer waits for another transaction's document lock.
    pub lock_timeout: Duration,
    /// Events buffered per collection before its change streams lag.
    pub change_stream_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            change_stream_capacity: DEFAULT_CHANGE_STREAM_CAPACITY,
        }
    }
}

/// Builder for [`DocumentStore`].
#[derive(Default)]
pub struct StoreBuilder {
    options: StoreOptions,
    listener: Option<Arc<dyn CommandListener>>,
}

impl StoreBuilder {
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.options.lock_timeout = timeout;
        self
    }

    pub fn change_stream_capacity(mut self, capacity: usize) -> Self {
        self.options.change_stream_capacity = capacity.max(1);
        self
    }

    pub fn command_listener(mut self, listener: Arc<dyn CommandListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn build(self) -> DocumentStore {
        DocumentStore {
            shared: Arc::new(Shared {
                state: Mutex::new(StoreState::default()),
                released: Condvar::new(),
                options: self.options,
                listener: self.listener,
                fail_points: Mutex::new(Vec::new()),
                changes: Mutex::new(HashMap::new()),
                next_request_id: AtomicU64::new(1),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }
}

/// Handle to an in-process document store. Clones share the same data.
#[derive(Clone)]
pub struct DocumentStore {
    shared: Arc<Shared>,
}

impl DocumentStore {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.shared.options
    }

    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(self.clone(), name)
    }

    /// Creates an empty collection. Returns `false` if it already existed.
    pub fn create_collection(&self, name: &str) -> bool {
        let mut state = self.shared.state.lock();
        if state.collections.contains_key(name) {
            return false;
        }
        state
            .collections
            .insert(name.to_string(), CollectionData::default());
        true
    }

    pub fn collection_exists(&self, name: &str) -> bool {
        self.shared.state.lock().collections.contains_key(name)
    }

    pub fn start_session(&self) -> ClientSession {
        let id = self.shared.next_session_id.fetch_add(1, Ordering::Relaxed);
        ClientSession::new(self.clone(), id)
    }

    /// Number of transactions begun and neither committed nor aborted.
    pub fn active_transactions(&self) -> usize {
        self.shared.state.lock().transactions.len()
    }

    pub fn configure_fail_point(&self, point: FailPoint) {
        self.shared.fail_points.lock().push(point);
    }

    pub fn clear_fail_points(&self) {
        self.shared.fail_points.lock().clear();
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    pub(crate) fn watch(&self, collection: &str) -> ChangeStream {
        let receiver = self
            .shared
            .changes
            .lock()
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(self.shared.options.change_stream_capacity).0)
            .subscribe();
        ChangeStream::new(receiver, collection.to_string())
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

pub(crate) struct Shared {
    state: Mutex<StoreState>,
    /// Signalled whenever a transaction releases its document locks.
    released: Condvar,
    options: StoreOptions,
    listener: Option<Arc<dyn CommandListener>>,
    fail_points: Mutex<Vec<FailPoint>>,
    /// One channel per watched collection, so traffic on one collection
    /// never makes another collection's streams lag.
    changes: Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>,
    next_request_id: AtomicU64,
    next_session_id: AtomicU64,
}

#[derive(Default)]
struct StoreState {
    collections: HashMap<String, CollectionData>,
    transactions: HashMap<TxnNumber, TransactionState>,
    next_txn: TxnNumber,
    next_resume_token: u64,
}

/// Documents keyed by insertion slot so scans run in insertion order.
#[derive(Default)]
struct CollectionData {
    documents: BTreeMap<u64, StoredDocument>,
    next_slot: u64,
}

impl CollectionData {
    fn contains_key(&self, key: &str) -> bool {
        self.documents.values().any(|stored| stored.key == key)
    }

    fn push(&mut self, key: String, body: Document) {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.documents.insert(
            slot,
            StoredDocument {
                key,
                body,
                locked_by: None,
            },
        );
    }
}

struct StoredDocument {
    key: String,
    /// Last committed version.
    body: Document,
    locked_by: Option<TxnNumber>,
}

/// Uncommitted writes of one transaction. Every staged slot is write-locked
/// by the owning transaction.
#[derive(Default)]
struct TransactionState {
    staged: HashMap<String, BTreeMap<u64, Document>>,
    inserts: Vec<(String, Document)>,
}

impl TransactionState {
    fn staged_body(&self, collection: &str, slot: u64) -> Option<&Document> {
        self.staged.get(collection).and_then(|slots| slots.get(&slot))
    }

    fn has_insert(&self, collection: &str, key: &str) -> bool {
        self.inserts.iter().any(|(target, doc)| {
            target == collection && doc.get(ID_FIELD).map(id_key).as_deref() == Some(key)
        })
    }
}

enum Target {
    Stored {
        slot: u64,
        key: String,
        locked_by: Option<TxnNumber>,
    },
    Pending(usize),
}

/// Rendering of a command's result for the command listener.
pub(crate) trait Reply {
    fn reply(&self) -> Value;
}

impl Reply for Vec<Document> {
    fn reply(&self) -> Value {
        json!({ "n": self.len(), "documents": self })
    }
}

impl Reply for UpdateResult {
    fn reply(&self) -> Value {
        json!({ "n": self.matched_count, "nModified": self.modified_count })
    }
}

impl Reply for InsertOneResult {
    fn reply(&self) -> Value {
        json!({ "n": 1, "insertedId": self.inserted_id })
    }
}

impl Reply for u64 {
    fn reply(&self) -> Value {
        json!({ "n": self })
    }
}

impl Reply for () {
    fn reply(&self) -> Value {
        json!({ "ok": 1 })
    }
}

impl Shared {
    /// Runs one command with listener notifications and fail points applied.
    pub(crate) fn run<T: Reply>(
        &self,
        command_name: CommandName,
        collection: Option<&str>,
        session_id: Option<u64>,
        command: impl FnOnce() -> Value,
        op: impl FnOnce() -> StoreResult<T>,
    ) -> StoreResult<T> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        if let Some(listener) = &self.listener {
            listener.command_started(&CommandStartedEvent {
                request_id,
                command_name,
                collection: collection.map(str::to_string),
                session_id,
                command: command(),
            });
        }

        let outcome = self.trip_fail_point(command_name).and_then(|()| op());

        if let Some(listener) = &self.listener {
            let duration = started.elapsed();
            match &outcome {
                Ok(value) => listener.command_succeeded(&CommandSucceededEvent {
                    request_id,
                    command_name,
                    duration,
                    reply: value.reply(),
                }),
                Err(failure) => listener.command_failed(&CommandFailedEvent {
                    request_id,
                    command_name,
                    duration,
                    failure: failure.clone(),
                }),
            }
        }
        outcome
    }

    fn trip_fail_point(&self, command_name: CommandName) -> StoreResult<()> {
        let mut points = self.fail_points.lock();
        let tripped = points.iter_mut().find_map(|point| point.trip(command_name));
        points.retain(|point| point.remaining() > 0);
        match tripped {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub(crate) fn find(
        &self,
        collection: &str,
        filter: &Filter,
        txn: Option<TxnNumber>,
    ) -> StoreResult<Vec<Document>> {
        let state = self.state.lock();
        let txn_state = match txn {
            Some(number) => Some(
                state
                    .transactions
                    .get(&number)
                    .ok_or(StoreError::NoTransaction)?,
            ),
            None => None,
        };

        let mut found = Vec::new();
        if let Some(data) = state.collections.get(collection) {
            for (slot, stored) in &data.documents {
                let body = txn_state
                    .and_then(|t| t.staged_body(collection, *slot))
                    .unwrap_or(&stored.body);
                if filter.matches(body) {
                    found.push(body.clone());
                }
            }
        }
        if let Some(txn_state) = txn_state {
            found.extend(
                txn_state
                    .inserts
                    .iter()
                    .filter(|(target, doc)| target == collection && filter.matches(doc))
                    .map(|(_, doc)| doc.clone()),
            );
        }
        Ok(found)
    }

    pub(crate) fn insert(
        &self,
        collection: &str,
        document: Document,
        txn: Option<TxnNumber>,
    ) -> StoreResult<InsertOneResult> {
        let id = document.get(ID_FIELD).cloned().ok_or(StoreError::MissingId)?;
        let key = id_key(&id);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(number) = txn {
            if !state.transactions.contains_key(&number) {
                return Err(StoreError::NoTransaction);
            }
            if !state.collections.contains_key(collection) {
                return Err(StoreError::NamespaceNotFound(collection.to_string()));
            }
        }

        let duplicate = || StoreError::DuplicateKey {
            collection: collection.to_string(),
            id: key.clone(),
        };
        if state
            .collections
            .get(collection)
            .is_some_and(|data| data.contains_key(&key))
        {
            return Err(duplicate());
        }
        for (owner, pending) in &state.transactions {
            if pending.has_insert(collection, &key) {
                return Err(if Some(*owner) == txn {
                    duplicate()
                } else {
                    StoreError::WriteConflict {
                        collection: collection.to_string(),
                        id: key.clone(),
                    }
                });
            }
        }

        match txn {
            Some(number) => {
                let pending = state
                    .transactions
                    .get_mut(&number)
                    .ok_or(StoreError::NoTransaction)?;
                pending.inserts.push((collection.to_string(), document));
            }
            None => {
                state
                    .collections
                    .entry(collection.to_string())
                    .or_default()
                    .push(key, document.clone());
                self.publish(
                    state,
                    OperationType::Insert,
                    collection,
                    id.clone(),
                    Some(document),
                );
            }
        }
        Ok(InsertOneResult { inserted_id: id })
    }

    /// Updates the first matching document.
    ///
    /// A document write-locked by another transaction is waited on until the
    /// lock is released or the lock timeout passes, then the filter is
    /// evaluated again against the newly committed state.
    pub(crate) fn update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        txn: Option<TxnNumber>,
    ) -> StoreResult<UpdateResult> {
        let deadline = Instant::now() + self.options.lock_timeout;
        let mut guard = self.state.lock();
        loop {
            let target = {
                let state = &*guard;
                let txn_state = match txn {
                    Some(number) => Some(
                        state
                            .transactions
                            .get(&number)
                            .ok_or(StoreError::NoTransaction)?,
                    ),
                    None => None,
                };
                let Some(data) = state.collections.get(collection) else {
                    return match txn {
                        Some(_) => Err(StoreError::NamespaceNotFound(collection.to_string())),
                        None => Ok(UpdateResult::default()),
                    };
                };
                locate(data, collection, filter, txn_state)
            };

            match target {
                None => return Ok(UpdateResult::default()),
                Some(Target::Stored {
                    key,
                    locked_by: Some(holder),
                    ..
                }) if Some(holder) != txn => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::WriteConflict {
                            collection: collection.to_string(),
                            id: key,
                        });
                    }
                    self.released.wait_until(&mut guard, deadline);
                }
                Some(Target::Stored { slot, .. }) => {
                    return self.apply_stored(&mut guard, collection, slot, update, txn);
                }
                Some(Target::Pending(index)) => {
                    let number = txn.ok_or(StoreError::NoTransaction)?;
                    let (_, doc) = guard
                        .transactions
                        .get_mut(&number)
                        .and_then(|pending| pending.inserts.get_mut(index))
                        .ok_or(StoreError::NoTransaction)?;
                    let mut body = doc.clone();
                    let modified = update.apply(&mut body)?;
                    *doc = body;
                    return Ok(UpdateResult {
                        matched_count: 1,
                        modified_count: u64::from(modified),
                    });
                }
            }
        }
    }

    fn apply_stored(
        &self,
        guard: &mut MutexGuard<'_, StoreState>,
        collection: &str,
        slot: u64,
        update: &Update,
        txn: Option<TxnNumber>,
    ) -> StoreResult<UpdateResult> {
        let state = &mut **guard;
        let missing = || StoreError::NamespaceNotFound(collection.to_string());
        let StoreState {
            collections,
            transactions,
            ..
        } = &mut *state;
        let stored = collections
            .get_mut(collection)
            .and_then(|data| data.documents.get_mut(&slot))
            .ok_or_else(missing)?;

        let modified = match txn {
            Some(number) => {
                let pending = transactions
                    .get_mut(&number)
                    .ok_or(StoreError::NoTransaction)?;
                let mut body = pending
                    .staged_body(collection, slot)
                    .unwrap_or(&stored.body)
                    .clone();
                let modified = update.apply(&mut body)?;
                stored.locked_by = Some(number);
                pending
                    .staged
                    .entry(collection.to_string())
                    .or_default()
                    .insert(slot, body);
                modified
            }
            None => {
                let mut body = stored.body.clone();
                let modified = update.apply(&mut body)?;
                if modified {
                    stored.body = body.clone();
                    let key = body.get(ID_FIELD).cloned().unwrap_or(Value::Null);
                    self.publish(state, OperationType::Update, collection, key, Some(body));
                }
                modified
            }
        };
        Ok(UpdateResult {
            matched_count: 1,
            modified_count: u64::from(modified),
        })
    }

    pub(crate) fn delete(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let deadline = Instant::now() + self.options.lock_timeout;
        let mut guard = self.state.lock();
        loop {
            let Some(data) = guard.collections.get(collection) else {
                return Ok(0);
            };
            let matching: Vec<u64> = data
                .documents
                .iter()
                .filter(|(_, stored)| filter.matches(&stored.body))
                .map(|(slot, _)| *slot)
                .collect();
            let blocked = data
                .documents
                .iter()
                .find(|(slot, stored)| stored.locked_by.is_some() && matching.contains(slot))
                .map(|(_, stored)| stored.key.clone());

            if let Some(key) = blocked {
                if Instant::now() >= deadline {
                    return Err(StoreError::WriteConflict {
                        collection: collection.to_string(),
                        id: key,
                    });
                }
                self.released.wait_until(&mut guard, deadline);
                continue;
            }

            let state = &mut *guard;
            let removed: Vec<StoredDocument> = match state.collections.get_mut(collection) {
                Some(data) => matching
                    .iter()
                    .filter_map(|slot| data.documents.remove(slot))
                    .collect(),
                None => Vec::new(),
            };
            for stored in &removed {
                let key = stored.body.get(ID_FIELD).cloned().unwrap_or(Value::Null);
                self.publish(state, OperationType::Delete, collection, key, None);
            }
            return Ok(removed.len() as u64);
        }
    }

    pub(crate) fn begin(&self) -> TxnNumber {
        let mut state = self.state.lock();
        state.next_txn += 1;
        let number = state.next_txn;
        state
            .transactions
            .insert(number, TransactionState::default());
        number
    }

    /// Makes the transaction's writes visible, then publishes their events:
    /// inserts first, then updates.
    pub(crate) fn commit(&self, number: TxnNumber) -> StoreResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let pending = state
            .transactions
            .remove(&number)
            .ok_or(StoreError::NoTransaction)?;

        let mut events = Vec::new();
        for (collection, document) in pending.inserts {
            let key = document.get(ID_FIELD).cloned().unwrap_or(Value::Null);
            state
                .collections
                .entry(collection.clone())
                .or_default()
                .push(id_key(&key), document.clone());
            events.push((OperationType::Insert, collection, key, document));
        }
        for (collection, slots) in pending.staged {
            let Some(data) = state.collections.get_mut(&collection) else {
                continue;
            };
            for (slot, body) in slots {
                let Some(stored) = data.documents.get_mut(&slot) else {
                    continue;
                };
                stored.locked_by = None;
                if stored.body != body {
                    stored.body = body.clone();
                    let key = body.get(ID_FIELD).cloned().unwrap_or(Value::Null);
                    events.push((OperationType::Update, collection.clone(), key, body));
                }
            }
        }
        for (operation, collection, key, document) in events {
            self.publish(state, operation, &collection, key, Some(document));
        }

        drop(guard);
        self.released.notify_all();
        Ok(())
    }

    /// Discards the transaction's writes and releases its locks. Aborting an
    /// unknown transaction is a no-op.
    pub(crate) fn abort(&self, number: TxnNumber) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(pending) = state.transactions.remove(&number) {
            for (collection, slots) in &pending.staged {
                let Some(data) = state.collections.get_mut(collection) else {
                    continue;
                };
                for slot in slots.keys() {
                    if let Some(stored) = data.documents.get_mut(slot) {
                        if stored.locked_by == Some(number) {
                            stored.locked_by = None;
                        }
                    }
                }
            }
        }
        drop(guard);
        self.released.notify_all();
    }

    fn publish(
        &self,
        state: &mut StoreState,
        operation_type: OperationType,
        collection: &str,
        document_key: Value,
        full_document: Option<Document>,
    ) {
        state.next_resume_token += 1;
        let changes = self.changes.lock();
        let Some(sender) = changes.get(collection) else {
            return;
        };
        // No subscribers is not an error.
        let _ = sender.send(ChangeEvent {
            resume_token: state.next_resume_token,
            operation_type,
            ns: collection.to_string(),
            document_key,
            full_document,
        });
    }
}

fn locate(
    data: &CollectionData,
    collection: &str,
    filter: &Filter,
    txn: Option<&TransactionState>,
) -> Option<Target> {
    for (slot, stored) in &data.documents {
        let body = txn
            .and_then(|t| t.staged_body(collection, *slot))
            .unwrap_or(&stored.body);
        if filter.matches(body) {
            return Some(Target::Stored {
                slot: *slot,
                key: stored.key.clone(),
                locked_by: stored.locked_by,
            });
        }
    }
    txn?.inserts
        .iter()
        .position(|(target, doc)| target == collection && filter.matches(doc))
        .map(Target::Pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let store = DocumentStore::new();
        assert_eq!(store.options().lock_timeout, Duration::from_millis(500));
        assert_eq!(store.options().change_stream_capacity, 1024);
    }

    #[test]
    fn writes_to_unwatched_collections_still_advance_the_resume_token() {
        let store = DocumentStore::new();
        let document = json!({"_id": "b1"}).as_object().cloned().unwrap();
        store.collection("books").insert_one(document).unwrap();

        assert!(store.shared.changes.lock().is_empty());
        assert_eq!(store.shared.state.lock().next_resume_token, 1);
    }
}
