//! keyval - An Add-Once In-Memory Key-Value Store
//!
//! This is the main entry point for the keyval server.
//! It parses flags, sets up logging and storage, and runs the accept loop
//! until Ctrl+C.

use clap::Parser;
use keyval::storage::{ShardedStorage, StorageManager};
use keyval::{Server, ServerConfig};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// keyval server
#[derive(Parser, Debug)]
#[command(name = "keyval")]
#[command(about = "Add-once in-memory key-value store over a memcached-style text protocol")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = keyval::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = keyval::DEFAULT_PORT)]
    listen: u16,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Idle read deadline per connection in seconds (0 disables)
    #[arg(long, default_value_t = 30)]
    read_timeout_secs: u64,

    /// Write deadline per response in seconds (0 disables)
    #[arg(long, default_value_t = 5)]
    write_timeout_secs: u64,
}

impl Args {
    fn to_config(&self) -> ServerConfig {
        ServerConfig::builder()
            .host(&self.host)
            .port(self.listen)
            .read_timeout(seconds(self.read_timeout_secs))
            .write_timeout(seconds(self.write_timeout_secs))
            .build()
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let config = args.to_config();

    info!("keyval v{}", keyval::VERSION);
    info!(
        read_timeout = ?config.read_timeout,
        write_timeout = ?config.write_timeout,
        "Connection deadlines"
    );

    // Storage is shared by every connection for the lifetime of the process
    let storage = Arc::new(ShardedStorage::new());
    info!("Storage initialized with 64 shards");

    let server = Server::bind(&config, Arc::clone(&storage) as Arc<dyn StorageManager>).await?;
    info!("Listening on {}", server.local_addr()?);
    let conn_stats = server.stats();

    server
        .run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    let stats = storage.stats();
    info!(
        keys = stats.keys,
        gets = stats.get_ops,
        get_misses = stats.get_misses,
        adds = stats.add_ops,
        add_conflicts = stats.add_conflicts,
        deletes = stats.del_ops,
        connections = conn_stats.connections_accepted.load(Ordering::Relaxed),
        commands = conn_stats.commands_processed.load(Ordering::Relaxed),
        "Server shutdown complete"
    );

    Ok(())
}
