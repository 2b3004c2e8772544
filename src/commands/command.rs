//! Command Implementations
//!
//! Each command is a parse + execute unit bound to the shared storage
//! manager. The two phases are strictly sequential: [`Execute::parse`]
//! consumes the command's whole argument grammar, and [`Execute::exec`]
//! consumes the command itself, so it can run at most once.
//!
//! ## Supported Commands
//!
//! - `PING` - Test connection, no arguments
//! - `GET key` - Fetch a stored value
//! - `ADD key flags ttl length` + payload line - Store a new item
//! - `DEL key` - Remove a key, absent or not

use crate::error::CommandError;
use crate::protocol::{FrameReader, ParseResult, Response};
use crate::storage::{Item, StorageManager};
use std::sync::Arc;

/// The capability every command provides.
pub trait Execute {
    /// Consumes the command's arguments from `args`.
    fn parse(&mut self, args: &mut FrameReader<'_>) -> ParseResult<()>;

    /// Runs the command and produces its wire response.
    fn exec(self) -> Result<Response, CommandError>;
}

/// PING
pub struct Ping;

impl Execute for Ping {
    fn parse(&mut self, _args: &mut FrameReader<'_>) -> ParseResult<()> {
        Ok(())
    }

    fn exec(self) -> Result<Response, CommandError> {
        Ok(Response::Pong)
    }
}

/// GET key
pub struct Get {
    storage: Arc<dyn StorageManager>,
    key: Option<String>,
}

impl Get {
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self { storage, key: None }
    }
}

impl Execute for Get {
    fn parse(&mut self, args: &mut FrameReader<'_>) -> ParseResult<()> {
        self.key = Some(args.read_key_line()?);
        Ok(())
    }

    fn exec(self) -> Result<Response, CommandError> {
        let key = self
            .key
            .ok_or_else(|| CommandError::invalid("GET", "missing key"))?;
        let item = self.storage.get(&key)?;
        Ok(Response::Value(item.value))
    }
}

/// ADD key flags ttl length, followed by the payload line
pub struct Add {
    storage: Arc<dyn StorageManager>,
    item: Option<Item>,
}

impl Add {
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self {
            storage,
            item: None,
        }
    }

    /// The item built by a successful parse.
    pub fn item(&self) -> Option<&Item> {
        self.item.as_ref()
    }
}

impl Execute for Add {
    fn parse(&mut self, args: &mut FrameReader<'_>) -> ParseResult<()> {
        let header = args.read_add_header()?;
        let value = args.read_payload(header.length)?;
        self.item = Some(Item::new(header.key, value, header.flags, header.ttl));
        Ok(())
    }

    fn exec(self) -> Result<Response, CommandError> {
        let item = self
            .item
            .ok_or_else(|| CommandError::invalid("ADD", "missing item"))?;
        self.storage.add(item)?;
        Ok(Response::Stored)
    }
}

/// DEL key
pub struct Delete {
    storage: Arc<dyn StorageManager>,
    key: Option<String>,
}

impl Delete {
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self { storage, key: None }
    }
}

impl Execute for Delete {
    fn parse(&mut self, args: &mut FrameReader<'_>) -> ParseResult<()> {
        self.key = Some(args.read_key_line()?);
        Ok(())
    }

    fn exec(self) -> Result<Response, CommandError> {
        let key = self
            .key
            .ok_or_else(|| CommandError::invalid("DEL", "missing key"))?;
        self.storage.delete(&key);
        Ok(Response::Deleted)
    }
}

/// The closed set of commands the server understands.
pub enum Command {
    Ping(Ping),
    Get(Get),
    Add(Add),
    Delete(Delete),
}

impl Command {
    /// The wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping(_) => "PING",
            Command::Get(_) => "GET",
            Command::Add(_) => "ADD",
            Command::Delete(_) => "DEL",
        }
    }

    /// Whether the command's grammar has arguments after the token.
    pub fn takes_arguments(&self) -> bool {
        !matches!(self, Command::Ping(_))
    }
}

impl Execute for Command {
    fn parse(&mut self, args: &mut FrameReader<'_>) -> ParseResult<()> {
        match self {
            Command::Ping(cmd) => cmd.parse(args),
            Command::Get(cmd) => cmd.parse(args),
            Command::Add(cmd) => cmd.parse(args),
            Command::Delete(cmd) => cmd.parse(args),
        }
    }

    fn exec(self) -> Result<Response, CommandError> {
        match self {
            Command::Ping(cmd) => cmd.exec(),
            Command::Get(cmd) => cmd.exec(),
            Command::Add(cmd) => cmd.exec(),
            Command::Delete(cmd) => cmd.exec(),
        }
    }
}
