//! Settings schema.
//!
//! File keys are camelCase; every section falls back to its compiled
//! defaults field by field.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GqlwsSettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Per-connection protocol settings.
    pub connection: ConnectionSettings,
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks an ephemeral port.
    pub port: u16,
    /// Route the WebSocket endpoint is mounted on.
    pub path: String,
    /// Maximum number of concurrent WebSocket connections.
    pub max_connections: usize,
    /// Expose Prometheus metrics at `/metrics`.
    pub metrics_enabled: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            path: "/graphql".to_string(),
            max_connections: 1024,
            metrics_enabled: false,
        }
    }
}

/// Per-connection protocol settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Maximum inbound frame size in bytes.
    pub read_limit: usize,
    /// Deadline for a single outbound write.
    pub write_timeout_ms: u64,
    /// Budget for one execution call (`ping`, `receive`, `start`).
    pub exec_timeout_ms: u64,
    /// Keep-alive interval. `0` disables keep-alive.
    pub keep_alive_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            read_limit: 4096,
            write_timeout_ms: 1000,
            exec_timeout_ms: 10_000,
            keep_alive_ms: 0,
        }
    }
}
