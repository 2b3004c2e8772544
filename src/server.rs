//! TCP accept loop.
//!
//! One task per accepted connection; every task shares the same storage
//! manager for the lifetime of the process.

use crate::commands::{CommandHandler, Registry};
use crate::config::ServerConfig;
use crate::connection::{handle_connection, ConnectionStats, Timeouts};
use crate::storage::StorageManager;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// A bound listener plus everything a connection task needs.
pub struct Server {
    listener: TcpListener,
    storage: Arc<dyn StorageManager>,
    registry: Arc<Registry>,
    stats: Arc<ConnectionStats>,
    timeouts: Timeouts,
}

impl Server {
    /// Binds to the configured address.
    pub async fn bind(
        config: &ServerConfig,
        storage: Arc<dyn StorageManager>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind_address()).await?;
        Ok(Self::from_listener(listener, storage, Timeouts::from(config)))
    }

    pub fn from_listener(
        listener: TcpListener,
        storage: Arc<dyn StorageManager>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            listener,
            storage,
            registry: Arc::new(Registry::default()),
            stats: Arc::new(ConnectionStats::new()),
            timeouts,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Accepts connections until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = self.accept_loop() => {}
            _ = shutdown => {
                info!("Shutdown signal received, stopping server...");
            }
        }
    }

    /// Main loop that accepts incoming connections
    async fn accept_loop(&self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Accepting connections on {}", addr);
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        error!(client = %addr, "Failed to set TCP_NODELAY: {}", e);
                    }

                    let handler = CommandHandler::with_registry(
                        Arc::clone(&self.storage),
                        Arc::clone(&self.registry),
                    );
                    let stats = Arc::clone(&self.stats);

                    tokio::spawn(handle_connection(
                        stream,
                        addr,
                        handler,
                        stats,
                        self.timeouts,
                    ));
                }
                Err(e) => {
                    error!("Failed to establish connection: {}", e);
                }
            }
        }
    }
}
