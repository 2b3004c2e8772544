//! Command Handler Module
//!
//! This module ties the framer, the registry and the commands together. It
//! receives the bytes buffered for a connection, frames exactly one request,
//! executes it against the storage manager, and reports how many bytes the
//! request used.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │   token     │───>│  registry   │───>│ parse/exec  │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      dyn StorageManager     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Grammar and storage failures never escape as errors: they become an
//! error literal in the response, and the error itself is handed back for
//! logging. The connection stays open after them.

use crate::commands::command::Execute;
use crate::commands::registry::Registry;
use crate::error::CommandError;
use crate::protocol::{FrameReader, ParseError, Response};
use crate::storage::StorageManager;
use std::sync::Arc;
use tracing::trace;

/// The result of handling one request.
#[derive(Debug)]
pub struct Outcome {
    /// Bytes of the stream the request occupied. This exceeds the buffered
    /// bytes when a rejected ADD payload has not fully arrived yet; the
    /// remainder must be discarded as it is read.
    pub consumed: usize,
    /// What to send back
    pub response: Response,
    /// The failure behind an error response, for logging
    pub error: Option<CommandError>,
}

impl Outcome {
    fn success(consumed: usize, response: Response) -> Self {
        Self {
            consumed,
            response,
            error: None,
        }
    }

    fn failure(consumed: usize, error: CommandError) -> Self {
        Self {
            consumed,
            response: Response::Error(error.kind()),
            error: Some(error),
        }
    }
}

/// Frames and executes requests against a shared storage manager.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<dyn StorageManager>,
    registry: Arc<Registry>,
}

impl CommandHandler {
    /// Creates a handler with the standard command set.
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self::with_registry(storage, Arc::new(Registry::default()))
    }

    pub fn with_registry(storage: Arc<dyn StorageManager>, registry: Arc<Registry>) -> Self {
        Self { storage, registry }
    }

    /// Handles the first request in `buf`.
    ///
    /// Returns `None` when the request is not complete yet; nothing is
    /// consumed in that case and the call should be repeated once more bytes
    /// have arrived.
    pub fn execute(&self, buf: &[u8]) -> Option<Outcome> {
        let mut reader = FrameReader::new(buf);

        let token = match reader.read_command_token() {
            Ok(token) => token,
            Err(ParseError::Incomplete) => return None,
            Err(_) => {
                // Not even text: report it as unknown and drop the line
                let name = first_line_lossy(buf);
                let consumed = reader.resync_point()?;
                return Some(Outcome::failure(consumed, CommandError::UnknownCommand(name)));
            }
        };

        let mut command = match self.registry.build(token.name, &self.storage) {
            Some(command) => command,
            None => {
                let error = CommandError::UnknownCommand(token.name.to_string());
                let consumed = if token.line_ended {
                    reader.position()
                } else {
                    reader.resync_point()?
                };
                return Some(Outcome::failure(consumed, error));
            }
        };

        let name = command.name();
        if command.takes_arguments() && token.line_ended {
            return Some(Outcome::failure(
                reader.position(),
                CommandError::invalid(name, "missing arguments"),
            ));
        }

        match command.parse(&mut reader) {
            Ok(()) => {}
            Err(ParseError::Incomplete) => {
                trace!(command = name, buffered = buf.len(), "Incomplete request");
                return None;
            }
            Err(ParseError::Invalid(reason)) => {
                let consumed = reader.resync_point()?;
                return Some(Outcome::failure(consumed, CommandError::invalid(name, reason)));
            }
            Err(ParseError::InvalidHeader { reason, skip }) => {
                let consumed = reader.position().saturating_add(skip);
                return Some(Outcome::failure(consumed, CommandError::invalid(name, reason)));
            }
        }

        let consumed = reader.position();
        trace!(command = name, consumed, "Parsed request");

        Some(match command.exec() {
            Ok(response) => Outcome::success(consumed, response),
            Err(error) => Outcome::failure(consumed, error),
        })
    }
}

fn first_line_lossy(buf: &[u8]) -> String {
    let start = buf
        .iter()
        .position(|&b| !matches!(b, b' ' | b'\r' | b'\n'))
        .unwrap_or(buf.len());
    let buf = &buf[start..];
    let end = buf
        .iter()
        .position(|&b| b == b' ' || b == b'\r' || b == b'\n')
        .unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
