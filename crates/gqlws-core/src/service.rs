//! The execution seam.
//!
//! The protocol engine never parses or executes GraphQL itself. It hands
//! documents to a [`GraphQLService`] and relays whatever comes back.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::context::OperationContext;
use crate::errors::ServiceError;
use crate::messages::GraphQLRequest;

/// A lazily-produced sequence of subscription results.
///
/// The stream ends when the subscription completes. The engine stops
/// polling it as soon as the operation is stopped or the connection ends.
pub type PayloadStream<T> = BoxStream<'static, T>;

/// GraphQL execution engine used by a connection.
#[async_trait]
pub trait GraphQLService: Send + Sync + 'static {
    /// One subscription result, relayed verbatim as a `data` payload.
    type Payload: Serialize + Send + 'static;

    /// Result of a one-shot execution, relayed verbatim as a `data` payload.
    type Response: Serialize + Send;

    /// Start a subscription. Errors here are reported before any results.
    async fn subscribe(
        &self,
        ctx: OperationContext,
        request: GraphQLRequest,
    ) -> Result<PayloadStream<Self::Payload>, ServiceError>;

    /// Execute a one-shot query or mutation.
    async fn exec(&self, ctx: OperationContext, request: GraphQLRequest) -> Self::Response;
}
