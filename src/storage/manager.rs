//! Thread-Safe Storage Manager with Add-Once Semantics
//!
//! This module implements the key-value store shared by every connection.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Instead of one big lock, keys are spread over 64 shards.
//! 2. **Atomic Add**: The existence check and the insert happen under one write
//!    lock through the map's entry API, so racing adds of the same key have
//!    exactly one winner.
//! 3. **No Expiry**: Items carry a TTL, but nothing here reads it. There is no
//!    eviction, no sweeper, and no capacity bound.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ShardedStorage                          │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callers never take a lock themselves; every operation is self-contained.

use crate::storage::item::Item;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Number of shards for the storage manager.
const NUM_SHARDS: usize = 64;

/// Failures reported by a storage manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("provided key has already been stored: '{0}'")]
    KeyExists(String),

    #[error("provided key not found: '{0}'")]
    KeyNotFound(String),
}

/// Concurrency-safe, add-once key-value storage.
///
/// Implementations must be safe for unsynchronized use from any number of
/// connection tasks.
pub trait StorageManager: Send + Sync {
    /// Returns a copy of the stored item.
    fn get(&self, key: &str) -> Result<Item, StorageError>;

    /// Stores `item` unless its key is already present. Never overwrites.
    fn add(&self, item: Item) -> Result<(), StorageError>;

    /// Removes `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str);
}

/// A snapshot of the storage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: u64,
    pub get_ops: u64,
    pub get_misses: u64,
    pub add_ops: u64,
    pub add_conflicts: u64,
    pub del_ops: u64,
}

/// A single shard containing a portion of the items.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<String, Item>>,
}

/// The default [`StorageManager`]: a sharded map of items.
///
/// # Example
///
/// ```
/// use keyval::storage::{Item, ShardedStorage, StorageError, StorageManager};
///
/// let storage = ShardedStorage::new();
/// storage.add(Item::new("color", "red", 0, 3600)).unwrap();
///
/// let err = storage.add(Item::new("color", "blue", 0, 0)).unwrap_err();
/// assert_eq!(err, StorageError::KeyExists("color".into()));
/// assert_eq!(&storage.get("color").unwrap().value[..], b"red");
/// ```
pub struct ShardedStorage {
    shards: Vec<Shard>,
    key_count: AtomicU64,
    get_count: AtomicU64,
    get_miss_count: AtomicU64,
    add_count: AtomicU64,
    add_conflict_count: AtomicU64,
    del_count: AtomicU64,
}

impl std::fmt::Debug for ShardedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedStorage")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for ShardedStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardedStorage {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            get_miss_count: AtomicU64::new(0),
            add_count: AtomicU64::new(0),
            add_conflict_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Number of stored items.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
            get_misses: self.get_miss_count.load(Ordering::Relaxed),
            add_ops: self.add_count.load(Ordering::Relaxed),
            add_conflicts: self.add_conflict_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
        }
    }
}

impl StorageManager for ShardedStorage {
    fn get(&self, key: &str) -> Result<Item, StorageError> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let data = self.shard(key).data.read();
        match data.get(key) {
            Some(item) => Ok(item.clone()),
            None => {
                self.get_miss_count.fetch_add(1, Ordering::Relaxed);
                Err(StorageError::KeyNotFound(key.to_string()))
            }
        }
    }

    fn add(&self, item: Item) -> Result<(), StorageError> {
        self.add_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.shard(&item.key).data.write();
        match data.entry(item.key.clone()) {
            Entry::Occupied(entry) => {
                self.add_conflict_count.fetch_add(1, Ordering::Relaxed);
                Err(StorageError::KeyExists(entry.key().clone()))
            }
            Entry::Vacant(entry) => {
                entry.insert(item);
                self.key_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    fn delete(&self, key: &str) {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.shard(key).data.write();
        if data.remove(key).is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
