//! Injected command failures for exercising error paths.

use crate::error::StoreError;
use crate::listener::CommandName;

/// Makes the next `times` executions of `command` fail with `error`.
///
/// The failure is raised after the command-started event and before the
/// command touches any data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailPoint {
    command: CommandName,
    error: StoreError,
    remaining: u32,
}

impl FailPoint {
    pub fn new(command: CommandName, error: StoreError, times: u32) -> Self {
        Self {
            command,
            error,
            remaining: times,
        }
    }

    /// Fails `command` with a transient write conflict.
    pub fn write_conflict(command: CommandName, times: u32) -> Self {
        Self::new(
            command,
            StoreError::WriteConflict {
                collection: "<fail point>".to_string(),
                id: "<fail point>".to_string(),
            },
            times,
        )
    }

    pub fn command(&self) -> CommandName {
        self.command
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Consumes one failure if this point applies to `command`.
    pub(crate) fn trip(&mut self, command: CommandName) -> Option<StoreError> {
        if self.command != command || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_only_its_command_and_only_n_times() {
        let mut point = FailPoint::write_conflict(CommandName::Update, 2);
        assert!(point.trip(CommandName::Insert).is_none());
        assert!(point.trip(CommandName::Update).is_some());
        assert!(point.trip(CommandName::Update).is_some());
        assert!(point.trip(CommandName::Update).is_none());
        assert_eq!(point.remaining(), 0);
    }
}
