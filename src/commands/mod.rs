//! Command Module
//!
//! This module implements the command layer of keyval. It frames requests
//! out of the connection buffer, builds the matching command from the
//! registry, and executes it against the storage manager.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Framer         │  (protocol module)
//! └────────┬────────┘
//!          │ token
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Registry     │
//! │  - Parse        │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageManager  │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`, `GET`, `ADD`, `DEL`

pub mod command;
pub mod handler;
pub mod registry;

pub use command::{Add, Command, Delete, Execute, Get, Ping};
pub use handler::{CommandHandler, Outcome};
pub use registry::{Constructor, Registry};
