//! The stored record.

use bytes::Bytes;
use std::time::Instant;

/// A key/value record with client-opaque flags and an advisory TTL.
///
/// The TTL is stored as given and never enforced; no expiry path reads it.
#[derive(Debug, Clone)]
pub struct Item {
    /// Item identifier, free of whitespace and control bytes
    pub key: String,
    /// Opaque payload
    pub value: Bytes,
    /// Client-defined tag, returned untouched
    pub flags: u8,
    /// Time to live in seconds (reserved, not enforced)
    pub ttl: u64,
    created_at: Instant,
    updated_at: Instant,
    is_valid: bool,
}

impl Item {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>, flags: u8, ttl: u64) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            value: value.into(),
            flags,
            ttl,
            created_at: now,
            updated_at: now,
            is_valid: true,
        }
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn updated_at(&self) -> Instant {
        self.updated_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Refreshes the update timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Instant::now();
    }
}
