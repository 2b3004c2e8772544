//! Incremental Request Parser
//!
//! This module implements the framer and the argument readers used by each
//! command's grammar. Parsing works directly on the connection's read buffer
//! and never blocks: every step either produces a value, reports that more
//! bytes are needed, or rejects the input.
//!
//! ## How the Parser Works
//!
//! A [`FrameReader`] walks the buffer with a cursor. Each read either:
//! - `Ok(value)` - the grammar element was complete, the cursor moved past it
//! - `Err(ParseError::Incomplete)` - wait for more data, nothing is consumed
//! - `Err(ParseError::Invalid(_))` - the bytes violate the grammar
//! - `Err(ParseError::InvalidHeader { .. })` - an ADD header was rejected, and
//!   its payload must be skipped too
//!
//! The caller advances its buffer by [`FrameReader::position`] only once a
//! whole request has been handled, so a retry after `Incomplete` starts again
//! from the first byte of the request.
//!
//! ## Grammar
//!
//! ```text
//! request   := command SP? arguments? CRLF
//! GET / DEL := KEY CRLF
//! ADD       := KEY SP FLAGS SP TTL SP LENGTH CRLF VALUE CRLF
//! ```

use crate::protocol::types::CRLF;
use bytes::Bytes;
use thiserror::Error;

/// Maximum key length in bytes (same as memcached)
pub const MAX_KEY_LENGTH: usize = 250;

/// Maximum ADD payload size (1 MiB)
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Number of fields in an ADD header line: key, flags, ttl, length
const ADD_HEADER_FIELDS: usize = 4;

/// Errors that can occur while parsing a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not enough data buffered yet
    #[error("incomplete request")]
    Incomplete,

    /// The request violates the grammar
    #[error("{0}")]
    Invalid(String),

    /// An ADD header was rejected after its length was read. The next
    /// `skip` bytes (payload plus CRLF) still belong to the request and must
    /// be discarded, whether or not they have arrived.
    #[error("{reason}")]
    InvalidHeader { reason: String, skip: usize },
}

impl ParseError {
    fn invalid(reason: impl Into<String>) -> Self {
        ParseError::Invalid(reason.into())
    }

    fn with_payload(self, skip: usize) -> Self {
        match self {
            ParseError::Invalid(reason) => ParseError::InvalidHeader { reason, skip },
            other => other,
        }
    }
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// A command token read by the framer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// The token text, trimmed of CR, LF and spaces
    pub name: &'a str,
    /// True when the token was terminated by the end of the line
    pub line_ended: bool,
}

/// Header fields of an ADD request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddHeader {
    pub key: String,
    pub flags: u8,
    pub ttl: u64,
    pub length: usize,
}

/// A cursor over buffered request bytes.
#[derive(Debug)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Reads the command token: everything up to the first space or LF.
    ///
    /// Leading CR, LF and spaces are skipped, so blank lines between requests
    /// are ignored. The delimiter is consumed. A buffer with no token, or one
    /// without a delimiter after the token yet, is `Incomplete`.
    pub fn read_command_token(&mut self) -> ParseResult<Token<'a>> {
        let rest = self.remaining();
        let start = rest
            .iter()
            .position(|b| !is_blank(*b))
            .ok_or(ParseError::Incomplete)?;
        let end = rest[start..]
            .iter()
            .position(|&b| b == b' ' || b == b'\n')
            .map(|offset| start + offset)
            .ok_or(ParseError::Incomplete)?;

        let line_ended = rest[end] == b'\n';
        let raw = trim(&rest[start..end]);
        let name = std::str::from_utf8(raw)
            .map_err(|_| ParseError::invalid("command token is not valid UTF-8"))?;

        self.pos += end + 1;
        Ok(Token { name, line_ended })
    }

    /// Reads one line and returns it without its CRLF.
    pub fn read_line(&mut self) -> ParseResult<&'a [u8]> {
        let rest = self.remaining();
        let end = find_crlf(rest).ok_or(ParseError::Incomplete)?;
        self.pos += end + CRLF.len();
        Ok(&rest[..end])
    }

    /// Reads a `KEY CRLF` argument line.
    pub fn read_key_line(&mut self) -> ParseResult<String> {
        let line = self.read_line()?;
        parse_key(line)
    }

    /// Reads an ADD header line: `KEY SP FLAGS SP TTL SP LENGTH CRLF`.
    ///
    /// LENGTH is read first. Once it is known, any other rejection is an
    /// [`ParseError::InvalidHeader`] carrying the payload extent, so the
    /// payload is skipped instead of being framed as requests.
    pub fn read_add_header(&mut self) -> ParseResult<AddHeader> {
        let line = self.read_line()?;
        let fields: Vec<&[u8]> = line.split(|&b| b == b' ').collect();

        if fields.len() < ADD_HEADER_FIELDS {
            return Err(ParseError::invalid(format!(
                "expected {} header fields, got {}",
                ADD_HEADER_FIELDS,
                fields.len()
            )));
        }
        if fields.len() > ADD_HEADER_FIELDS {
            return Err(ParseError::invalid("unexpected trailing header fields"));
        }

        let length = parse_number::<usize>(fields[3], "length")?;
        let skip = length.saturating_add(CRLF.len());

        if length > MAX_VALUE_SIZE {
            return Err(ParseError::InvalidHeader {
                reason: format!("value too large: {} bytes (max: {})", length, MAX_VALUE_SIZE),
                skip,
            });
        }

        let key = parse_key(fields[0]).map_err(|e| e.with_payload(skip))?;
        let flags = parse_number::<u8>(fields[1], "flags").map_err(|e| e.with_payload(skip))?;
        let ttl = parse_number::<u64>(fields[2], "ttl").map_err(|e| e.with_payload(skip))?;

        Ok(AddHeader {
            key,
            flags,
            ttl,
            length,
        })
    }

    /// Reads exactly `length` payload bytes followed by the terminating CRLF.
    ///
    /// The CRLF is framing and is not part of the returned value, and the
    /// payload itself may contain any bytes, CRLF included. Nothing is
    /// decided until `length + 2` bytes are buffered. A payload whose CRLF
    /// does not sit right after `length` bytes is then rejected, and the
    /// cursor moves past the first CRLF so the bad payload is not read as a
    /// command.
    pub fn read_payload(&mut self, length: usize) -> ParseResult<Bytes> {
        let rest = self.remaining();
        let total = length + CRLF.len();

        if rest.len() < total {
            return Err(ParseError::Incomplete);
        }

        if &rest[length..total] == CRLF {
            self.pos += total;
            return Ok(Bytes::copy_from_slice(&rest[..length]));
        }

        let end = find_crlf(rest).ok_or(ParseError::Incomplete)?;
        self.pos += end + CRLF.len();
        Err(ParseError::invalid(format!(
            "payload does not match declared length {}",
            length
        )))
    }

    /// Where to resume after an invalid request.
    ///
    /// If the cursor sits at the start of a line, the bad line has already
    /// been consumed. Otherwise everything through the next CRLF is skipped.
    /// `None` means that CRLF has not arrived yet.
    pub fn resync_point(&self) -> Option<usize> {
        if self.pos > 0 && self.buf[self.pos - 1] == b'\n' {
            return Some(self.pos);
        }
        find_crlf(self.remaining()).map(|end| self.pos + end + CRLF.len())
    }
}

/// Validates and converts a key.
///
/// Keys are non-empty, at most [`MAX_KEY_LENGTH`] bytes, and contain no
/// whitespace or control bytes.
pub fn parse_key(raw: &[u8]) -> ParseResult<String> {
    if raw.is_empty() {
        return Err(ParseError::invalid("empty key"));
    }
    if raw.len() > MAX_KEY_LENGTH {
        return Err(ParseError::invalid(format!(
            "key too long: {} bytes (max: {})",
            raw.len(),
            MAX_KEY_LENGTH
        )));
    }
    if raw
        .iter()
        .any(|&b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(ParseError::invalid("key contains whitespace or control bytes"));
    }

    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|_| ParseError::invalid("key is not valid UTF-8"))
}

fn parse_number<T: std::str::FromStr>(raw: &[u8], field: &str) -> ParseResult<T> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .ok_or_else(|| {
            ParseError::invalid(format!(
                "invalid {}: '{}'",
                field,
                String::from_utf8_lossy(raw)
            ))
        })
}

fn is_blank(b: u8) -> bool {
    matches!(b, b'\r' | b'\n' | b' ')
}

fn trim(mut raw: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = raw {
        if is_blank(*first) {
            raw = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = raw {
        if is_blank(*last) {
            raw = rest;
        } else {
            break;
        }
    }
    raw
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
pub fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_command_token_with_arguments() {
        let mut reader = FrameReader::new(b"GET widget\r\n");
        let token = reader.read_command_token().unwrap();
        assert_eq!(token.name, "GET");
        assert!(!token.line_ended);
        assert_eq!(reader.remaining(), b"widget\r\n");
    }

    #[test]
    fn test_read_command_token_end_of_line() {
        let mut reader = FrameReader::new(b"PING\r\nGET");
        let token = reader.read_command_token().unwrap();
        assert_eq!(token.name, "PING");
        assert!(token.line_ended);
        assert_eq!(reader.position(), 6);
    }

    #[test]
    fn test_read_command_token_skips_blank_lines() {
        let mut reader = FrameReader::new(b"\r\n \r\nPING\r\n");
        let token = reader.read_command_token().unwrap();
        assert_eq!(token.name, "PING");
        assert!(token.line_ended);
        assert!(reader.remaining().is_empty());

        // Blank lines alone are not a request yet
        assert_eq!(
            FrameReader::new(b"\r\n\r\n").read_command_token(),
            Err(ParseError::Incomplete)
        );
    }

    #[test]
    fn test_read_command_token_incomplete() {
        assert_eq!(
            FrameReader::new(b"PIN").read_command_token(),
            Err(ParseError::Incomplete)
        );
        assert_eq!(
            FrameReader::new(b"").read_command_token(),
            Err(ParseError::Incomplete)
        );
    }

    #[test]
    fn test_read_key_line() {
        let mut reader = FrameReader::new(b"widget\r\nrest");
        assert_eq!(reader.read_key_line().unwrap(), "widget");
        assert_eq!(reader.remaining(), b"rest");
    }

    #[test]
    fn test_read_key_line_rejects_bad_keys() {
        assert!(matches!(
            FrameReader::new(b"\r\n").read_key_line(),
            Err(ParseError::Invalid(_))
        ));
        assert!(matches!(
            FrameReader::new(b"two words\r\n").read_key_line(),
            Err(ParseError::Invalid(_))
        ));
        assert!(matches!(
            FrameReader::new(b"tab\there\r\n").read_key_line(),
            Err(ParseError::Invalid(_))
        ));

        let long = format!("{}\r\n", "k".repeat(MAX_KEY_LENGTH + 1));
        assert!(matches!(
            FrameReader::new(long.as_bytes()).read_key_line(),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn test_read_key_line_incomplete() {
        assert_eq!(
            FrameReader::new(b"widget\r").read_key_line(),
            Err(ParseError::Incomplete)
        );
    }

    #[test]
    fn test_read_add_header() {
        let mut reader = FrameReader::new(b"widget 7 120 5\r\nhello\r\n");
        let header = reader.read_add_header().unwrap();
        assert_eq!(
            header,
            AddHeader {
                key: "widget".into(),
                flags: 7,
                ttl: 120,
                length: 5,
            }
        );
        assert_eq!(reader.remaining(), b"hello\r\n");
    }

    #[test]
    fn test_read_add_header_too_few_fields() {
        let mut reader = FrameReader::new(b"widget 7 120\r\n");
        assert!(matches!(
            reader.read_add_header(),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn test_read_add_header_bad_length() {
        let inputs: [&[u8]; 3] = [
            b"widget 7 120 five\r\n",
            b"widget 7 120 -1\r\n",
            b"widget 7 120 5 extra\r\n",
        ];
        for input in inputs {
            assert!(
                matches!(
                    FrameReader::new(input).read_add_header(),
                    Err(ParseError::Invalid(_))
                ),
                "accepted {:?}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn test_read_add_header_bad_fields_skip_payload() {
        let inputs: [&[u8]; 4] = [
            b"widget 256 120 5\r\n",
            b"widget x 120 5\r\n",
            b"widget 7 -1 5\r\n",
            b"bad\x01key 7 120 5\r\n",
        ];
        for input in inputs {
            let mut reader = FrameReader::new(input);
            assert!(
                matches!(
                    reader.read_add_header(),
                    Err(ParseError::InvalidHeader { skip: 7, .. })
                ),
                "accepted {:?}",
                String::from_utf8_lossy(input)
            );
            // The header line itself is consumed
            assert!(reader.remaining().is_empty());
        }
    }

    #[test]
    fn test_read_add_header_value_too_large() {
        let input = format!("big 0 0 {}\r\n", MAX_VALUE_SIZE + 1);
        let mut reader = FrameReader::new(input.as_bytes());
        assert_eq!(
            reader.read_add_header(),
            Err(ParseError::InvalidHeader {
                reason: format!(
                    "value too large: {} bytes (max: {})",
                    MAX_VALUE_SIZE + 1,
                    MAX_VALUE_SIZE
                ),
                skip: MAX_VALUE_SIZE + 3,
            })
        );
        assert_eq!(reader.position(), input.len());
    }

    #[test]
    fn test_read_payload() {
        let mut reader = FrameReader::new(b"hello\r\nnext");
        assert_eq!(reader.read_payload(5).unwrap(), Bytes::from("hello"));
        assert_eq!(reader.remaining(), b"next");
    }

    #[test]
    fn test_read_payload_is_binary_safe() {
        let mut reader = FrameReader::new(b"a\r\nb\x00\r\n");
        assert_eq!(
            reader.read_payload(5).unwrap(),
            Bytes::from(&b"a\r\nb\x00"[..])
        );
    }

    #[test]
    fn test_read_payload_short() {
        let mut reader = FrameReader::new(b"hel\r\nPING\r\n");
        assert!(matches!(reader.read_payload(5), Err(ParseError::Invalid(_))));
        assert_eq!(reader.remaining(), b"PING\r\n");
    }

    #[test]
    fn test_read_payload_long() {
        let mut reader = FrameReader::new(b"hellooo\r\n");
        assert!(matches!(reader.read_payload(5), Err(ParseError::Invalid(_))));
        assert!(reader.remaining().is_empty());

        // Long payload without its terminator yet
        assert_eq!(
            FrameReader::new(b"hellooo").read_payload(5),
            Err(ParseError::Incomplete)
        );
    }

    #[test]
    fn test_read_payload_incomplete() {
        assert_eq!(
            FrameReader::new(b"hel").read_payload(5),
            Err(ParseError::Incomplete)
        );
        assert_eq!(
            FrameReader::new(b"hello\r").read_payload(5),
            Err(ParseError::Incomplete)
        );
        // A short payload is only judged once enough bytes follow it
        assert_eq!(
            FrameReader::new(b"hel\r\n").read_payload(5),
            Err(ParseError::Incomplete)
        );
    }

    #[test]
    fn test_read_payload_with_crlf_arriving_in_pieces() {
        let full = b"a\r\nbcd\r\n";
        for split in 0..full.len() {
            assert_eq!(
                FrameReader::new(&full[..split]).read_payload(6),
                Err(ParseError::Incomplete),
                "split {}",
                split
            );
        }

        let mut reader = FrameReader::new(full);
        assert_eq!(reader.read_payload(6).unwrap(), Bytes::from(&b"a\r\nbcd"[..]));
        assert!(reader.remaining().is_empty());
    }

    #[test]
    fn test_resync_point() {
        // Failure at the start of the buffer skips the first line
        let reader = FrameReader::new(b"garbage\r\nPING\r\n");
        assert_eq!(reader.resync_point(), Some(9));

        // A consumed header line needs nothing more skipped
        let mut reader = FrameReader::new(b"x\r\nPING\r\n");
        reader.read_line().unwrap();
        assert_eq!(reader.resync_point(), Some(3));

        // Mid-line failure skips through the next CRLF
        let mut reader = FrameReader::new(b"ADD hel\r\nPING\r\n");
        reader.read_command_token().unwrap();
        assert_eq!(reader.resync_point(), Some(9));

        let reader = FrameReader::new(b"no terminator");
        assert_eq!(reader.resync_point(), None);
    }

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"abc\r\n"), Some(3));
        assert_eq!(find_crlf(b"abc\n"), None);
        assert_eq!(find_crlf(b""), None);
    }
}
