//! Per-call execution context.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::ids::{ConnectionId, RequestId};

/// Attributes attached to a connection at upgrade time (e.g. by an auth
/// validator). Shared read-only by every call on the connection.
pub type Attributes = Arc<Map<String, Value>>;

/// Context handed to every [`GraphQLService`](crate::GraphQLService) call.
///
/// The cancellation token fires when the operation is stopped, the
/// connection ends, or (for one-shot calls) the execution budget runs out.
/// Services should observe it in long-running work.
#[derive(Clone, Debug)]
pub struct OperationContext {
    /// Connection the call belongs to.
    pub connection_id: ConnectionId,
    /// Client-assigned operation id, for `start`.
    pub operation_id: Option<String>,
    /// Fresh per call.
    pub request_id: RequestId,
    /// Connection attributes.
    pub attributes: Attributes,
    /// Cancelled when the call's scope ends.
    pub cancel: CancellationToken,
}

impl OperationContext {
    /// Build a context with a fresh [`RequestId`].
    pub fn new(
        connection_id: ConnectionId,
        operation_id: Option<String>,
        attributes: Attributes,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection_id,
            operation_id,
            request_id: RequestId::new(),
            attributes,
            cancel,
        }
    }

    /// Look up a connection attribute.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Whether the call's scope has ended.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
