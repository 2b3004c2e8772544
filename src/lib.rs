//! # keyval - An Add-Once In-Memory Key-Value Store
//!
//! keyval is an in-memory key-value store spoken over a line-oriented TCP
//! text protocol, in the spirit of a trimmed-down memcached. Its one twist is
//! add-once storage: ADD never overwrites a key that is already stored.
//!
//! ## Features
//!
//! - **Simple Text Protocol**: `PING`, `GET`, `ADD` and `DEL`, CRLF-terminated
//! - **Add-Once Semantics**: racing ADDs of one key have exactly one winner
//! - **Sharded Storage**: 64 independent locks for concurrent access
//! - **Async I/O**: Built on Tokio, one task per connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               keyval                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │  Framer +   │    │              StorageManager                  │   │
//! │  │  Registry   │    │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │   │
//! │  │             │    │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...N    │ │   │
//! │  └─────────────┘    │  │RwLock  │ │RwLock  │ │RwLock  │ │shards  │ │   │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │   │
//! │                     └──────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use keyval::{Server, ServerConfig, ShardedStorage};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let storage = Arc::new(ShardedStorage::new());
//!     let server = Server::bind(&ServerConfig::default(), storage).await?;
//!     server.run_until(std::future::pending()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING` -> `PONG`
//! - `GET key` -> `<value>` or `ERR_KEY_NOT_EXISTS`
//! - `ADD key flags ttl length` + `<value>` -> `STORED` or `ERR_KEY_EXISTS`
//! - `DEL key` -> `DELETED`
//!
//! ## Module Overview
//!
//! - [`protocol`]: Request framer and response literals
//! - [`commands`]: Command registry, command implementations and dispatch
//! - [`storage`]: Items and the thread-safe storage manager
//! - [`connection`]: Client connection management
//! - [`server`]: TCP accept loop

pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandHandler, Registry};
pub use config::ServerConfig;
pub use connection::{handle_connection, ConnectionStats, Timeouts};
pub use error::{CommandError, ErrorKind};
pub use protocol::{FrameReader, ParseError, Response};
pub use server::Server;
pub use storage::{Item, ShardedStorage, StorageError, StorageManager};

/// The default port keyval listens on
pub const DEFAULT_PORT: u16 = 22122;

/// The default host keyval binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of keyval
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
