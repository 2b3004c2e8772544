//! Wire Responses
//!
//! Every response is a single line terminated by CRLF. There is no type
//! prefix and no length header; the client knows what to expect from the
//! command it sent.
//!
//! ## Examples
//!
//! Ping: `PONG\r\n`
//! Add: `STORED\r\n`
//! Get: `hello\r\n`
//! Delete: `DELETED\r\n`
//! Error: `ERR_KEY_EXISTS\r\n`

use crate::error::ErrorKind;
use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used throughout the protocol
pub const CRLF: &[u8] = b"\r\n";

/// Fixed response literals, CRLF included.
pub mod literal {
    pub const PONG: &[u8] = b"PONG\r\n";
    pub const STORED: &[u8] = b"STORED\r\n";
    pub const DELETED: &[u8] = b"DELETED\r\n";

    pub const UNKNOWN_COMMAND: &[u8] = b"ERR_UNKNOWN_COMMAND\r\n";
    pub const INVALID_ARGUMENTS: &[u8] = b"ERR_INVALID_ARGUMENTS\r\n";
    /// Never sent today: a failed read closes the connection without a reply.
    pub const READ_COMMAND_ERROR: &[u8] = b"ERR_READ_COMMAND\r\n";
    pub const KEY_EXISTS: &[u8] = b"ERR_KEY_EXISTS\r\n";
    pub const KEY_NOT_FOUND: &[u8] = b"ERR_KEY_NOT_EXISTS\r\n";
}

/// Maps an error kind to the bytes a client receives for it.
pub fn error_literal(kind: ErrorKind) -> &'static [u8] {
    match kind {
        ErrorKind::UnknownCommand => literal::UNKNOWN_COMMAND,
        ErrorKind::InvalidArguments => literal::INVALID_ARGUMENTS,
        ErrorKind::ReadCommandError => literal::READ_COMMAND_ERROR,
        ErrorKind::KeyExists => literal::KEY_EXISTS,
        ErrorKind::KeyNotFound => literal::KEY_NOT_FOUND,
    }
}

/// A response ready to be written to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Reply to PING
    Pong,
    /// ADD succeeded
    Stored,
    /// DEL acknowledged, whether or not the key existed
    Deleted,
    /// GET hit: the raw value, followed by CRLF on the wire
    Value(Bytes),
    /// A request failed with the given kind
    Error(ErrorKind),
}

impl Response {
    /// Serializes the response to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the response into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Response::Pong => buf.extend_from_slice(literal::PONG),
            Response::Stored => buf.extend_from_slice(literal::STORED),
            Response::Deleted => buf.extend_from_slice(literal::DELETED),
            Response::Value(data) => {
                buf.reserve(data.len() + CRLF.len());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Response::Error(kind) => buf.extend_from_slice(error_literal(*kind)),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

impl From<ErrorKind> for Response {
    fn from(kind: ErrorKind) -> Self {
        Response::Error(kind)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Pong => write!(f, "PONG"),
            Response::Stored => write!(f, "STORED"),
            Response::Deleted => write!(f, "DELETED"),
            Response::Value(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Response::Error(kind) => write!(f, "(error) {}", kind),
        }
    }
}
