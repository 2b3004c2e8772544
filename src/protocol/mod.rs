//! Text Protocol Implementation
//!
//! This module implements the line-oriented wire protocol spoken by keyval.
//!
//! ## Overview
//!
//! Requests are a command token followed by that command's own argument
//! grammar. Every line ends in CRLF. Responses are single CRLF-terminated
//! lines: a fixed literal, a stored value, or an error literal.
//!
//! ## Modules
//!
//! - `types`: Defines the `Response` enum and the wire-literal table
//! - `parser`: Incremental framer and argument readers
//!
//! ## Example
//!
//! ```
//! use keyval::protocol::{FrameReader, Response};
//!
//! let mut reader = FrameReader::new(b"GET widget\r\n");
//! let token = reader.read_command_token().unwrap();
//! assert_eq!(token.name, "GET");
//! assert_eq!(reader.read_key_line().unwrap(), "widget");
//!
//! assert_eq!(Response::Pong.serialize(), b"PONG\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{AddHeader, FrameReader, ParseError, ParseResult, Token};
pub use types::{error_literal, Response};
