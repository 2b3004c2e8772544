//! Storage Module
//!
//! This module owns every stored [`Item`]. Connections never hold items across
//! requests; they receive copies from the [`StorageManager`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 dyn StorageManager                          │
//! │                  get / add / delete                         │
//! │                          │                                  │
//! │                          ▼                                  │
//! │                   ShardedStorage                            │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Add-Once**: ADD on a stored key is rejected, never overwritten
//! - **Idempotent Delete**: deleting an absent key succeeds
//! - **Sharded Storage**: 64 independent shards reduce lock contention
//!
//! ## Example
//!
//! ```
//! use keyval::storage::{Item, ShardedStorage, StorageManager};
//!
//! let storage = ShardedStorage::new();
//! storage.add(Item::new("name", "keyval", 0, 0)).unwrap();
//! assert_eq!(&storage.get("name").unwrap().value[..], b"keyval");
//!
//! storage.delete("name");
//! storage.delete("name");
//! assert!(storage.get("name").is_err());
//! ```

pub mod item;
pub mod manager;

pub use item::Item;
pub use manager::{ShardedStorage, StorageError, StorageManager, StorageStats};
