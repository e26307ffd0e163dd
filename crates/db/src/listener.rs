//! Command monitoring hooks.
//!
//! Every store command reports to the listener injected through
//! [`StoreBuilder::command_listener`](crate::StoreBuilder::command_listener):
//! once when it starts and once when it succeeds or fails.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    Find,
    Insert,
    Update,
    Delete,
    CommitTransaction,
    AbortTransaction,
}

impl CommandName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::Find => "find",
            CommandName::Insert => "insert",
            CommandName::Update => "update",
            CommandName::Delete => "delete",
            CommandName::CommitTransaction => "commitTransaction",
            CommandName::AbortTransaction => "abortTransaction",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CommandStartedEvent {
    pub request_id: u64,
    pub command_name: CommandName,
    pub collection: Option<String>,
    /// Session the command runs in, if any.
    pub session_id: Option<u64>,
    pub command: Value,
}

#[derive(Debug, Clone)]
pub struct CommandSucceededEvent {
    pub request_id: u64,
    pub command_name: CommandName,
    pub duration: Duration,
    pub reply: Value,
}

#[derive(Debug, Clone)]
pub struct CommandFailedEvent {
    pub request_id: u64,
    pub command_name: CommandName,
    pub duration: Duration,
    pub failure: StoreError,
}

/// Observer of store commands.
///
/// Hooks run synchronously on the thread executing the command and must not
/// call back into the store.
pub trait CommandListener: Send + Sync {
    fn command_started(&self, _event: &CommandStartedEvent) {}

    fn command_succeeded(&self, _event: &CommandSucceededEvent) {}

    fn command_failed(&self, _event: &CommandFailedEvent) {}
}

/// Writes one `tracing` line per command event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCommandListener;

impl CommandListener for TracingCommandListener {
    fn command_started(&self, event: &CommandStartedEvent) {
        tracing::debug!(
            target: "bookstore_db::command",
            request_id = event.request_id,
            command = %event.command_name,
            collection = event.collection.as_deref().unwrap_or("-"),
            session = ?event.session_id,
            body = %event.command,
            "-->"
        );
    }

    fn command_succeeded(&self, event: &CommandSucceededEvent) {
        tracing::debug!(
            target: "bookstore_db::command",
            request_id = event.request_id,
            command = %event.command_name,
            elapsed_us = event.duration.as_micros() as u64,
            reply = %event.reply,
            "<--"
        );
    }

    fn command_failed(&self, event: &CommandFailedEvent) {
        tracing::warn!(
            target: "bookstore_db::command",
            request_id = event.request_id,
            command = %event.command_name,
            elapsed_us = event.duration.as_micros() as u64,
            error = %event.failure,
            "-X-"
        );
    }
}
