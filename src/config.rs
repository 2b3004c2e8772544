//! Server configuration with sensible defaults.
//!
//! Flag parsing lives in the binary; the library only sees resolved values.

use std::time::Duration;

/// Network configuration for a keyval server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// How long a connection may sit idle waiting for its next bytes.
    /// `None` disables the deadline.
    pub read_timeout: Option<Duration>,

    /// How long writing one response may take. `None` disables the deadline.
    pub write_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            read_timeout: Some(Duration::from_secs(30)),
            write_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for [`ServerConfig`]
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}
