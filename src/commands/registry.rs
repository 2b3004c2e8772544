//! Command Registry
//!
//! Maps a command token to the constructor of the matching [`Command`].
//! Lookups are case-sensitive literal matches. Supporting a new command means
//! registering another constructor; the dispatch logic does not change.

use crate::commands::command::{Add, Command, Delete, Get, Ping};
use crate::storage::StorageManager;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a command bound to the shared storage manager.
pub type Constructor = fn(Arc<dyn StorageManager>) -> Command;

/// Token to constructor table, fixed once the server starts.
#[derive(Clone)]
pub struct Registry {
    constructors: HashMap<&'static str, Constructor>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = self.names();
        names.sort_unstable();
        f.debug_struct("Registry").field("commands", &names).finish()
    }
}

impl Default for Registry {
    /// The standard command set: PING, GET, ADD, DEL.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("PING", |_| Command::Ping(Ping));
        registry.register("GET", |storage| Command::Get(Get::new(storage)));
        registry.register("ADD", |storage| Command::Add(Add::new(storage)));
        registry.register("DEL", |storage| Command::Delete(Delete::new(storage)));
        registry
    }
}

impl Registry {
    /// A registry with no commands.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers `name`, replacing any previous constructor for it.
    pub fn register(&mut self, name: &'static str, constructor: Constructor) {
        self.constructors.insert(name, constructor);
    }

    /// Builds the command registered under `token`, if any.
    pub fn build(&self, token: &str, storage: &Arc<dyn StorageManager>) -> Option<Command> {
        self.constructors
            .get(token)
            .map(|constructor| constructor(Arc::clone(storage)))
    }

    pub fn contains(&self, token: &str) -> bool {
        self.constructors.contains_key(token)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.constructors.keys().copied().collect()
    }
}
