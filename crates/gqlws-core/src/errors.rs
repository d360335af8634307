//! Error types for the protocol engine.
//!
//! - [`ProtocolError`]: client input the state machine rejects. Always
//!   reported back to the client, never fatal to the connection.
//! - [`ServiceError`]: failures raised by the execution collaborator.
//! - [`TransportError`]: frame-level I/O failures. Fatal to the connection.

use std::time::Duration;

use crate::messages::MessageType;

/// Result of handling one client message.
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Client input that cannot be processed.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Envelope could not be decoded from the frame.
    #[error("invalid message: {0}")]
    MalformedMessage(String),

    /// Payload does not match the shape required by its message type.
    #[error("invalid payload for type: {message_type}")]
    InvalidPayload {
        /// Type of the offending envelope.
        message_type: MessageType,
    },

    /// An operation-scoped message arrived without an id.
    #[error("missing ID for {message_type} operation")]
    MissingId {
        /// Type of the offending envelope.
        message_type: MessageType,
    },

    /// `start` reused the id of an operation that is still running.
    #[error("operation with ID {0} already exists")]
    DuplicateOperation(String),

    /// Envelope type outside the client-to-server vocabulary.
    #[error("unknown operation message of type: {0}")]
    UnsupportedType(MessageType),

    /// Execution call did not finish within its budget.
    #[error("execution timed out after {}ms", .0.as_millis())]
    ExecTimeout(Duration),
}

impl ProtocolError {
    /// Short stable label, suitable for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedMessage(_) => "malformed_message",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::MissingId { .. } => "missing_id",
            Self::DuplicateOperation(_) => "duplicate_operation",
            Self::UnsupportedType(_) => "unsupported_type",
            Self::ExecTimeout(_) => "exec_timeout",
        }
    }
}

/// Failure reported by a [`GraphQLService`](crate::GraphQLService).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The request was rejected before execution (parse or validation).
    #[error("{0}")]
    Rejected(String),

    /// Execution failed.
    #[error("{0}")]
    Failed(String),

    /// The call observed cancellation.
    #[error("operation cancelled")]
    Cancelled,
}

impl ServiceError {
    /// Build a [`ServiceError::Rejected`] from any message.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Build a [`ServiceError::Failed`] from any message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Frame-level transport failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Underlying socket or WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Inbound frame exceeded the configured read limit.
    #[error("frame of {size} bytes exceeds read limit of {limit} bytes")]
    FrameTooLarge {
        /// Size of the received frame.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Inbound binary frame was not valid UTF-8.
    #[error("frame is not valid utf-8")]
    InvalidUtf8,

    /// A single write did not complete within the write deadline.
    #[error("write timed out after {}ms", .0.as_millis())]
    WriteTimeout(Duration),

    /// The transport has already been closed.
    #[error("transport closed")]
    Closed,
}
