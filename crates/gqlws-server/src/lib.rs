//! # gqlws-server
//!
//! `graphql-ws` protocol engine and its Axum WebSocket endpoint.
//!
//! - Per-connection engine: write loop, read loop and operation tasks under
//!   one `CancellationToken` root ([`connection`])
//! - Transport seam: [`FrameReader`]/[`FrameWriter`] with Axum `WebSocket` adapters
//! - HTTP endpoint: sub-protocol negotiation, auth, connection limit, fallback
//!   router, `/health` and optional `/metrics` ([`server`])
//! - Graceful shutdown via [`ShutdownCoordinator`]

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;

pub use config::{ConnectionConfig, ServerConfig};
pub use connection::transport::{FrameReader, FrameWriter, WsReader, WsWriter, split_socket};
pub use connection::{Connection, ConnectionOutcome, connect};
pub use server::{AllowAll, AuthError, AuthValidator, GRAPHQL_WS_PROTOCOL, GraphQLWsServer, ServerError};
pub use shutdown::ShutdownCoordinator;
