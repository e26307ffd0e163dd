//! In-process document store with multi-document transactions.
//!
//! Collections hold JSON documents keyed by `_id`. Writes made inside a
//! session's transaction stay private to it until commit, and every document
//! they touch is write-locked until the transaction ends. Committed writes are
//! published on per-collection change streams.

mod change_stream;
mod collection;
mod document;
mod error;
mod fail_point;
mod listener;
mod reactive;
mod session;
mod store;
mod transaction;

pub use change_stream::{ChangeEvent, ChangeStream, OperationType};
pub use collection::Collection;
pub use document::{Document, Filter, InsertOneResult, Update, UpdateResult, ID_FIELD};
pub use error::{StoreError, StoreResult};
pub use fail_point::FailPoint;
pub use listener::{
    CommandFailedEvent, CommandListener, CommandName, CommandStartedEvent, CommandSucceededEvent,
    TracingCommandListener,
};
pub use reactive::{ReactiveClient, ReactiveCollection, ReactiveSession};
pub use session::{ClientSession, TransactionStatus};
pub use store::{DocumentStore, StoreBuilder, StoreOptions};
pub use transaction::TransactionTemplate;
