//! Connection Handler Module
//!
//! This module manages individual client connections to keyval.
//! Each client connection is handled by its own async task, allowing
//! the server to handle thousands of concurrent clients efficiently.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (server.rs)                              │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Frame req.  │───>│ Execute cmd │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Send resp   │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Async I/O**: Uses Tokio for non-blocking network operations
//! - **Buffer Management**: Efficient BytesMut buffer for incoming data
//! - **Deadlines**: Optional read and write timeouts per connection
//! - **Statistics**: Tracks connection and command metrics

pub mod handler;

// Re-export commonly used types
pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, Timeouts,
};
