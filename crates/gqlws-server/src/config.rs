//! Server and per-connection configuration.

use std::time::Duration;

use gqlws_settings::{ConnectionSettings, GqlwsSettings};

/// Per-connection protocol limits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Maximum inbound frame size in bytes. Larger frames end the connection.
    pub read_limit: usize,
    /// Deadline for a single outbound write.
    pub write_timeout: Duration,
    /// Budget for one execution call (`ping`, `receive`, `subscribe`).
    pub exec_timeout: Duration,
    /// Interval of `ka` frames after `connection_ack`. `None` disables them.
    pub keep_alive: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_limit: 4096,
            write_timeout: Duration::from_secs(1),
            exec_timeout: Duration::from_secs(10),
            keep_alive: None,
        }
    }
}

impl ConnectionConfig {
    /// Override the inbound frame size limit.
    #[must_use]
    pub fn with_read_limit(mut self, bytes: usize) -> Self {
        self.read_limit = bytes;
        self
    }

    /// Override the per-write deadline.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Override the execution budget.
    #[must_use]
    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    /// Enable keep-alive frames at the given interval.
    #[must_use]
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = Some(interval);
        self
    }
}

impl From<&ConnectionSettings> for ConnectionConfig {
    fn from(s: &ConnectionSettings) -> Self {
        Self {
            read_limit: s.read_limit,
            write_timeout: Duration::from_millis(s.write_timeout_ms),
            exec_timeout: Duration::from_millis(s.exec_timeout_ms),
            keep_alive: (s.keep_alive_ms > 0).then(|| Duration::from_millis(s.keep_alive_ms)),
        }
    }
}

/// Configuration for [`GraphQLWsServer`](crate::server::GraphQLWsServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Route of the WebSocket endpoint.
    pub path: String,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Serve Prometheus metrics at `/metrics`.
    pub metrics_enabled: bool,
    /// Limits applied to every connection.
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            path: "/graphql".into(),
            max_connections: 1024,
            metrics_enabled: false,
            connection: ConnectionConfig::default(),
        }
    }
}

impl From<&GqlwsSettings> for ServerConfig {
    fn from(s: &GqlwsSettings) -> Self {
        Self {
            host: s.server.host.clone(),
            port: s.server.port,
            path: s.server.path.clone(),
            max_connections: s.server.max_connections,
            metrics_enabled: s.server.metrics_enabled,
            connection: ConnectionConfig::from(&s.connection),
        }
    }
}
