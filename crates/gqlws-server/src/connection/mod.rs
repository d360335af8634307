//! One `graphql-ws` connection: write loop, read loop, and operation tasks
//! under a single cancellation root.

mod dispatcher;
pub mod operations;
pub mod sender;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use gqlws_core::{Attributes, ConnectionId, GraphQLService, TransportError};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

pub use dispatcher::{PING_QUERY, RECEIVE_QUERY};
use dispatcher::{Dispatcher, ReadExit};
use transport::{FrameReader, FrameWriter};

use crate::config::ConnectionConfig;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};

/// How a connection ended.
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// Client sent `connection_terminate`.
    Terminated,
    /// Transport closed by the peer.
    TransportClosed,
    /// Read failed, or a frame exceeded the read limit.
    TransportError(TransportError),
    /// An outbound write failed or timed out.
    WriteFailed(TransportError),
    /// The parent scope was cancelled.
    Cancelled,
}

/// A connection that has not started serving yet.
///
/// Create it, keep [`cancel_handle`](Self::cancel_handle) if you need to end
/// it from outside, then hand the transport halves to [`serve`](Self::serve).
pub struct Connection<S: GraphQLService> {
    id: ConnectionId,
    service: Arc<S>,
    root: CancellationToken,
    config: ConnectionConfig,
    attributes: Attributes,
}

impl<S: GraphQLService> Connection<S> {
    /// New connection whose root scope is a child of `parent`.
    pub fn new(service: Arc<S>, parent: &CancellationToken, config: ConnectionConfig) -> Self {
        Self {
            id: ConnectionId::new(),
            service,
            root: parent.child_token(),
            config,
            attributes: Arc::new(Map::new()),
        }
    }

    /// Attach attributes visible to every call on this connection.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = Arc::new(attributes);
        self
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Token that ends the connection when cancelled.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Run the connection to completion.
    ///
    /// Returns after every operation task has exited and the transport has
    /// been closed.
    pub async fn serve<R, W>(self, mut reader: R, writer: W) -> ConnectionOutcome
    where
        R: FrameReader,
        W: FrameWriter,
    {
        let span = info_span!("connection", connection_id = %self.id);
        async move {
            metrics::counter!(WS_CONNECTIONS_TOTAL).increment(1);
            metrics::gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
            info!("connection opened");

            let (sender, write_task) =
                sender::spawn(writer, self.root.clone(), self.config.write_timeout);
            let dispatcher = Dispatcher::new(
                self.id,
                self.attributes,
                self.service,
                sender,
                self.root.clone(),
                self.config,
            );
            let exit = dispatcher.run(&mut reader).await;

            let written = match write_task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "write loop panicked");
                    Ok(())
                }
            };

            let outcome = match (exit, written) {
                (ReadExit::Cancelled, Err(e)) => ConnectionOutcome::WriteFailed(e),
                (ReadExit::Terminated, _) => ConnectionOutcome::Terminated,
                (ReadExit::Closed, _) => ConnectionOutcome::TransportClosed,
                (ReadExit::Failed(e), _) => ConnectionOutcome::TransportError(e),
                (ReadExit::Cancelled, Ok(())) => ConnectionOutcome::Cancelled,
            };

            metrics::gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
            info!(?outcome, "connection closed");
            outcome
        }
        .instrument(span)
        .await
    }
}

/// Serve one connection over `reader`/`writer` until it ends.
pub async fn connect<S, R, W>(
    service: Arc<S>,
    parent: &CancellationToken,
    config: ConnectionConfig,
    reader: R,
    writer: W,
) -> ConnectionOutcome
where
    S: GraphQLService,
    R: FrameReader,
    W: FrameWriter,
{
    Connection::new(service, parent, config)
        .serve(reader, writer)
        .await
}
