//! # gqlws-core
//!
//! Shared vocabulary for the `graphql-ws` protocol engine:
//!
//! - **Messages**: the `{id, type, payload}` envelope, [`MessageType`], and the
//!   payload shapes of each message type
//! - **Errors**: [`ProtocolError`], [`ServiceError`], [`TransportError`] via `thiserror`
//! - **Branded IDs**: [`ConnectionId`], [`RequestId`] as newtypes
//! - **Service seam**: the [`GraphQLService`] trait the engine executes through,
//!   plus the per-operation [`OperationContext`]
//! - **Logging**: subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod service;

pub use context::{Attributes, OperationContext};
pub use errors::{ProtocolError, ServiceError, TransportError};
pub use ids::{ConnectionId, RequestId};
pub use messages::{
    ErrorPayload, GraphQLRequest, MessageType, OperationMessage, ReceivePayload, StartPayload,
};
pub use service::{GraphQLService, PayloadStream};
