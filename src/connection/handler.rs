//! Connection Handler Module
//!
//! This module handles individual client connections to keyval.
//! Each client gets its own handler task that runs in a loop,
//! framing requests and sending responses.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Frame + execute every   │ │
//!    │  │ complete request        │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Send each response      │ │
//!    │  │ (write deadline)        │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read more bytes         │ │
//!    │  │ (read deadline)         │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / I/O error / deadline
//!        │
//!        ▼
//! 5. Handler task ends
//! ```
//!
//! ## Buffer Management
//!
//! We use a BytesMut buffer to accumulate incoming data. TCP is a stream
//! protocol: a read may hold half a request, or several. Requests on one
//! connection are executed and answered strictly in order.

use crate::commands::CommandHandler;
use crate::config::ServerConfig;
use crate::error::{CommandError, ErrorKind};
use crate::protocol::parser::MAX_VALUE_SIZE;
use crate::protocol::Response;
use bytes::{Buf, BytesMut};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, trace, warn};

/// Maximum size for the read buffer: one full payload plus headroom
const MAX_BUFFER_SIZE: usize = MAX_VALUE_SIZE + 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Commands answered with an error literal
    pub command_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_failed(&self) {
        self.command_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Per-connection socket deadlines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Option<Duration>,
    pub write: Option<Duration>,
}

impl From<&ServerConfig> for Timeouts {
    fn from(config: &ServerConfig) -> Self {
        Self {
            read: config.read_timeout,
            write: config.write_timeout,
        }
    }
}

/// Handles a single client connection.
///
/// This struct manages the read buffer, framing, and response sending
/// for one connected client.
pub struct ConnectionHandler<S> {
    /// The stream for this connection
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// The command handler (shared storage behind it)
    command_handler: CommandHandler,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    timeouts: Timeouts,

    /// Bytes of a rejected payload still to be dropped as they arrive
    discard: usize,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The byte stream for this connection
    /// * `addr` - The client's socket address
    /// * `command_handler` - The command handler for executing requests
    /// * `stats` - Shared connection statistics
    /// * `timeouts` - Read and write deadlines
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
        timeouts: Timeouts,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            stats,
            timeouts,
            discard: 0,
        }
    }

    /// Runs the main connection loop.
    ///
    /// This method frames requests from the client, executes them,
    /// and sends back responses until the client disconnects or an error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                ConnectionError::ReadCommand(err) => {
                    warn!(client = %self.addr, kind = %err.kind(), error = %err, "Closing connection")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    /// The main frame-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            self.drop_discarded();

            while self.discard == 0 {
                let Some(outcome) = self.command_handler.execute(&self.buffer) else {
                    break;
                };

                let buffered = outcome.consumed.min(self.buffer.len());
                self.buffer.advance(buffered);
                self.discard = outcome.consumed - buffered;
                self.stats.command_processed();

                if let Some(err) = &outcome.error {
                    self.stats.command_failed();
                    self.log_command_error(err);
                }

                self.send_response(&outcome.response).await?;
            }

            self.read_more_data().await?;
        }
    }

    /// Drops buffered bytes that belong to a rejected payload.
    fn drop_discarded(&mut self) {
        let n = self.discard.min(self.buffer.len());
        if n > 0 {
            self.buffer.advance(n);
            self.discard -= n;
            trace!(client = %self.addr, bytes = n, remaining = self.discard, "Discarded payload");
        }
    }

    fn log_command_error(&self, err: &CommandError) {
        match err.kind() {
            ErrorKind::KeyExists | ErrorKind::KeyNotFound => {
                debug!(client = %self.addr, kind = %err.kind(), error = %err, "Command failed")
            }
            _ => warn!(client = %self.addr, kind = %err.kind(), error = %err, "Rejected request"),
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        // Check buffer size limit
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            warn!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        // Ensure we have some capacity
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let read = self.stream.get_mut().read_buf(&mut self.buffer);
        let n = with_deadline(self.timeouts.read, read)
            .await?
            .map_err(|e| ConnectionError::ReadCommand(CommandError::ReadCommand(e)))?;

        if n == 0 {
            // Connection closed by client
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial request in buffer
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Sends a response to the client.
    ///
    /// `write_all` keeps writing through short writes until every byte is
    /// out; only a genuine I/O error or the deadline aborts it.
    async fn send_response(&mut self, response: &Response) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        let stream = &mut self.stream;
        with_deadline(self.timeouts.write, async {
            stream.write_all(&bytes).await?;
            stream.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await??;

        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Sent response"
        );
        Ok(())
    }
}

/// Runs `fut` under an optional deadline.
async fn with_deadline<F: Future>(
    deadline: Option<Duration>,
    fut: F,
) -> Result<F::Output, ConnectionError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ConnectionError::Timeout(limit)),
        None => Ok(fut.await),
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The next request could not be read
    #[error("{0}")]
    ReadCommand(CommandError),

    /// A read or write deadline passed
    #[error("Deadline of {0:?} exceeded")]
    Timeout(Duration),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial request)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    timeouts: Timeouts,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats, timeouts);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ShardedStorage, StorageManager};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_test::io::Builder;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn mock_handler<S>(stream: S, timeouts: Timeouts) -> (ConnectionHandler<S>, Arc<ConnectionStats>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        mock_handler_with_storage(stream, timeouts, Arc::new(ShardedStorage::new()))
    }

    fn mock_handler_with_storage<S>(
        stream: S,
        timeouts: Timeouts,
        storage: Arc<dyn StorageManager>,
    ) -> (ConnectionHandler<S>, Arc<ConnectionStats>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let stats = Arc::new(ConnectionStats::new());
        let handler = ConnectionHandler::new(
            stream,
            test_addr(),
            CommandHandler::new(storage),
            Arc::clone(&stats),
            timeouts,
        );
        (handler, stats)
    }

    async fn create_test_server(timeouts: Timeouts) -> (SocketAddr, Arc<ShardedStorage>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(ShardedStorage::new());
        let stats = Arc::new(ConnectionStats::new());

        let shared: Arc<dyn StorageManager> = storage.clone();
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&shared));
                let stats = Arc::clone(&stats);
                tokio::spawn(handle_connection(stream, client_addr, handler, stats, timeouts));
            }
        });

        (addr, storage)
    }

    /// Reads from `client` until `expected` bytes arrived or a read stalls.
    async fn read_exactly(client: &mut TcpStream, expected: usize) -> Vec<u8> {
        let mut buf = vec![0u8; 1024];
        let mut total = 0;
        while total < expected {
            match tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf[total..])).await
            {
                Ok(Ok(n)) if n > 0 => total += n,
                _ => break,
            }
        }
        buf.truncate(total);
        buf
    }

    #[tokio::test]
    async fn test_mock_ping_pong() {
        let stream = Builder::new().read(b"PING\r\n").write(b"PONG\r\n").build();
        let (handler, stats) = mock_handler(stream, Timeouts::default());

        let result = handler.run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 6);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_mock_request_split_across_reads() {
        let stream = Builder::new()
            .read(b"ADD widget 7 12")
            .read(b"0 5\r\nhel")
            .read(b"lo\r\nGET widget\r\n")
            .write(b"STORED\r\n")
            .write(b"hello\r\n")
            .build();
        let (handler, stats) = mock_handler(stream, Timeouts::default());

        assert!(handler.run().await.is_err());
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.command_errors.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_mock_errors_keep_connection_open() {
        let stream = Builder::new()
            .read(b"NOPE\r\nGET missing\r\nPING\r\n")
            .write(b"ERR_UNKNOWN_COMMAND\r\n")
            .write(b"ERR_KEY_NOT_EXISTS\r\n")
            .write(b"PONG\r\n")
            .build();
        let (handler, stats) = mock_handler(stream, Timeouts::default());

        assert!(handler.run().await.is_err());
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 3);
        assert_eq!(stats.command_errors.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_mock_value_with_crlf_split_across_reads() {
        let stream = Builder::new()
            .read(b"ADD k 0 0 6\r\na\r\n")
            .read(b"bcd\r\n")
            .read(b"GET k\r\n")
            .write(b"STORED\r\n")
            .write(b"a\r\nbcd\r\n")
            .build();
        let (handler, stats) = mock_handler(stream, Timeouts::default());

        assert!(handler.run().await.is_err());
        assert_eq!(stats.command_errors.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_mock_response_survives_short_writes() {
        // Each pause ends a write call early, so the response goes out in pieces
        let pause = Duration::from_millis(1);
        let stream = Builder::new()
            .read(b"ADD k 0 0 2\r\nok\r\n")
            .write(b"S")
            .wait(pause)
            .write(b"TO")
            .wait(pause)
            .write(b"RED")
            .wait(pause)
            .write(b"\r\n")
            .build();
        let (handler, stats) = mock_handler(stream, Timeouts::default());

        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::ClientDisconnected)
        ));
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 8);
    }

    #[tokio::test]
    async fn test_mock_oversized_add_payload_is_discarded() {
        let storage: Arc<dyn StorageManager> = Arc::new(ShardedStorage::new());
        storage
            .add(crate::storage::Item::new("victim", "v", 0, 0))
            .unwrap();

        let length = MAX_VALUE_SIZE + 1;
        let mut payload = b"DEL victim\r\n".to_vec();
        payload.resize(length, b'x');
        payload.extend_from_slice(b"\r\n");
        let (first, second) = payload.split_at(length / 2);

        let stream = Builder::new()
            .read(format!("ADD big 0 0 {}\r\n", length).as_bytes())
            .read(first)
            .read(second)
            .read(b"GET victim\r\n")
            .write(b"ERR_INVALID_ARGUMENTS\r\n")
            .write(b"v\r\n")
            .build();
        let (handler, stats) = mock_handler_with_storage(stream, Timeouts::default(), storage);

        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::ClientDisconnected)
        ));
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_mock_read_error_sends_nothing() {
        let stream = Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken",
            ))
            .build();
        let (handler, stats) = mock_handler(stream, Timeouts::default());

        let result = handler.run().await;
        assert!(matches!(
            result,
            Err(ConnectionError::ReadCommand(ref err)) if err.kind() == ErrorKind::ReadCommandError
        ));
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_mock_partial_request_at_eof() {
        let stream = Builder::new().read(b"GET wid").build();
        let (handler, _) = mock_handler(stream, Timeouts::default());

        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_mock_read_deadline() {
        let stream = Builder::new().wait(Duration::from_millis(500)).build();
        let timeouts = Timeouts {
            read: Some(Duration::from_millis(20)),
            write: None,
        };
        let (handler, _) = mock_handler(stream, timeouts);

        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _) = create_test_server(Timeouts::default()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"PING\r\n").await.unwrap();

        let response = read_exactly(&mut client, 6).await;
        assert_eq!(response, b"PONG\r\n");
    }

    #[tokio::test]
    async fn test_add_get_del() {
        let (addr, storage) = create_test_server(Timeouts::default()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"ADD widget 7 120 5\r\nhello\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 8).await, b"STORED\r\n");
        assert_eq!(storage.len(), 1);

        client.write_all(b"GET widget\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut client, 7).await, b"hello\r\n");

        client.write_all(b"DEL widget\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut client, 9).await, b"DELETED\r\n");

        client.write_all(b"GET widget\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut client, 20).await, b"ERR_KEY_NOT_EXISTS\r\n");
    }

    #[tokio::test]
    async fn test_pipelined_requests() {
        let (addr, _) = create_test_server(Timeouts::default()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"ADD k1 0 0 2\r\nv1\r\nADD k1 0 0 2\r\nv2\r\nGET k1\r\nPING\r\n")
            .await
            .unwrap();

        let expected = b"STORED\r\nERR_KEY_EXISTS\r\nv1\r\nPONG\r\n";
        let response = read_exactly(&mut client, expected.len()).await;
        assert_eq!(response, expected);
    }

    #[tokio::test]
    async fn test_concurrent_clients_add_same_key() {
        let (addr, storage) = create_test_server(Timeouts::default()).await;
        let clients = 8;

        let mut tasks = Vec::new();
        for i in 0..clients {
            tasks.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                let request = format!("ADD race 0 0 2\r\nv{}\r\n", i);
                client.write_all(request.as_bytes()).await.unwrap();
                let mut buf = vec![0u8; 64];
                let n = client.read(&mut buf).await.unwrap();
                buf.truncate(n);
                buf
            }));
        }

        let mut stored = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap().as_slice() {
                b"STORED\r\n" => stored += 1,
                b"ERR_KEY_EXISTS\r\n" => conflicts += 1,
                other => panic!("unexpected response {:?}", String::from_utf8_lossy(other)),
            }
        }

        assert_eq!(stored, 1);
        assert_eq!(conflicts, clients - 1);
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_idle_connection_is_closed() {
        let timeouts = Timeouts {
            read: Some(Duration::from_millis(50)),
            write: None,
        };
        let (addr, _) = create_test_server(timeouts).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}
