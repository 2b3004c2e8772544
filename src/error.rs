//! Error Types
//!
//! Two small, parallel tables describe every client-visible failure:
//!
//! - [`ErrorKind`]: the closed set of outcomes used for logging and propagation
//! - the wire-literal table in [`crate::protocol::types`], which maps each kind
//!   to the fixed bytes a client receives
//!
//! [`CommandError`] carries the context (offending token, key, reason) for a
//! single failed request and always reports exactly one [`ErrorKind`].

use crate::storage::StorageError;
use std::fmt;
use thiserror::Error;

/// The kinds of failure a request can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The command token is not in the registry
    UnknownCommand,
    /// The arguments violate the command's grammar
    InvalidArguments,
    /// The command token could not be read from the connection
    ReadCommandError,
    /// ADD on a key that is already stored
    KeyExists,
    /// GET on a key that is not stored
    KeyNotFound,
}

impl ErrorKind {
    /// Short, stable name used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownCommand => "unknown_command",
            ErrorKind::InvalidArguments => "invalid_arguments",
            ErrorKind::ReadCommandError => "read_command_error",
            ErrorKind::KeyExists => "key_exists",
            ErrorKind::KeyNotFound => "key_not_found",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed request, with enough context to log it.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("invalid arguments for '{command}': {reason}")]
    InvalidArguments {
        command: &'static str,
        reason: String,
    },

    #[error("could not read command: {0}")]
    ReadCommand(#[source] std::io::Error),

    #[error("key already stored: '{0}'")]
    KeyExists(String),

    #[error("key not found: '{0}'")]
    KeyNotFound(String),
}

impl CommandError {
    pub fn invalid(command: &'static str, reason: impl Into<String>) -> Self {
        CommandError::InvalidArguments {
            command,
            reason: reason.into(),
        }
    }

    /// Returns the kind this error is reported as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::UnknownCommand(_) => ErrorKind::UnknownCommand,
            CommandError::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            CommandError::ReadCommand(_) => ErrorKind::ReadCommandError,
            CommandError::KeyExists(_) => ErrorKind::KeyExists,
            CommandError::KeyNotFound(_) => ErrorKind::KeyNotFound,
        }
    }
}

impl From<StorageError> for CommandError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::KeyExists(key) => CommandError::KeyExists(key),
            StorageError::KeyNotFound(key) => CommandError::KeyNotFound(key),
        }
    }
}
