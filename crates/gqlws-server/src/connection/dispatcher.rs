//! Read loop and protocol state machine.
//!
//! The dispatcher owns the inbound half of the transport and the operation
//! table. It handles one frame at a time; streaming results are produced by
//! per-operation tasks that write through the shared [`Sender`].

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use gqlws_core::{
    Attributes, ConnectionId, ErrorPayload, GraphQLRequest, GraphQLService, MessageType,
    OperationContext, OperationMessage, PayloadStream, ProtocolError, ReceivePayload,
    StartPayload, TransportError,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::operations::OperationTable;
use super::sender::Sender;
use super::transport::FrameReader;
use crate::config::ConnectionConfig;
use crate::metrics::{
    EXEC_DURATION_SECONDS, FRAMES_RECEIVED_TOTAL, OPERATIONS_ACTIVE, OPERATIONS_STARTED_TOTAL,
    PROTOCOL_ERRORS_TOTAL,
};

/// Query executed for `ping`.
pub const PING_QUERY: &str = "{check_subscription}";

/// Mutation executed for `receive`, with the event id bound as `$id`.
pub const RECEIVE_QUERY: &str = "mutation ($id: ID!) { receive_socket_event(id: $id) }";

/// Why the read loop stopped.
#[derive(Debug)]
pub(crate) enum ReadExit {
    /// Client sent `connection_terminate`.
    Terminated,
    /// Transport closed cleanly.
    Closed,
    /// Read error or oversize frame.
    Failed(TransportError),
    /// Root token fired.
    Cancelled,
}

enum Flow {
    Continue,
    Terminate,
}

pub(crate) struct Dispatcher<S: GraphQLService> {
    connection_id: ConnectionId,
    attributes: Attributes,
    service: Arc<S>,
    sender: Sender,
    root: CancellationToken,
    config: ConnectionConfig,
    operations: OperationTable,
    keep_alive: Option<JoinHandle<()>>,
}

impl<S: GraphQLService> Dispatcher<S> {
    pub(crate) fn new(
        connection_id: ConnectionId,
        attributes: Attributes,
        service: Arc<S>,
        sender: Sender,
        root: CancellationToken,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            connection_id,
            attributes,
            service,
            sender,
            root,
            config,
            operations: OperationTable::new(),
            keep_alive: None,
        }
    }

    /// Read and handle frames until the connection ends, then cancel the
    /// root scope and wait for every operation to exit.
    pub(crate) async fn run<R: FrameReader>(mut self, reader: &mut R) -> ReadExit {
        let exit = loop {
            let read = tokio::select! {
                biased;
                () = self.root.cancelled() => break ReadExit::Cancelled,
                read = reader.read_frame() => read,
            };
            let frame = match read {
                Ok(Some(frame)) => frame,
                Ok(None) => break ReadExit::Closed,
                Err(e) => break ReadExit::Failed(e),
            };
            if frame.len() > self.config.read_limit {
                break ReadExit::Failed(TransportError::FrameTooLarge {
                    size: frame.len(),
                    limit: self.config.read_limit,
                });
            }
            metrics::counter!(FRAMES_RECEIVED_TOTAL).increment(1);

            if let Flow::Terminate = self.dispatch(&frame).await {
                break ReadExit::Terminated;
            }
            let _ = self.operations.prune_finished();
        };

        debug!(?exit, active_operations = self.operations.len(), "read loop stopped");
        self.shutdown().await;
        exit
    }

    async fn shutdown(&mut self) {
        self.root.cancel();
        self.operations.shutdown().await;
        if let Some(task) = self.keep_alive.take() {
            let _ = task.await;
        }
    }

    async fn dispatch(&mut self, frame: &str) -> Flow {
        let msg = match OperationMessage::from_json(frame) {
            Ok(msg) => msg,
            Err(err) => {
                self.reject(None, MessageType::ConnectionError, &err).await;
                return Flow::Continue;
            }
        };
        debug!(
            message_type = %msg.message_type,
            operation_id = msg.operation_id(),
            "received message"
        );

        match &msg.message_type {
            MessageType::ConnectionInit => self.on_connection_init(&msg).await,
            MessageType::Start => self.on_start(&msg).await,
            MessageType::Stop => self.on_stop(&msg).await,
            MessageType::Ping => self.on_ping(&msg).await,
            MessageType::Receive => self.on_receive(&msg).await,
            MessageType::ConnectionTerminate => {
                info!("client terminated connection");
                return Flow::Terminate;
            }
            other => {
                let err = ProtocolError::UnsupportedType(other.clone());
                self.reject(msg.operation_id(), MessageType::Error, &err)
                    .await;
            }
        }
        Flow::Continue
    }

    async fn on_connection_init(&mut self, msg: &OperationMessage) {
        // any object (or nothing) is accepted; the content is not interpreted
        if let Err(err) = msg.decode_payload::<Option<Map<String, Value>>>() {
            self.reject(None, MessageType::ConnectionError, &err).await;
            return;
        }
        self.sender.send(None, MessageType::ConnectionAck, None).await;
        info!("connection acknowledged");
        self.start_keep_alive();
    }

    fn start_keep_alive(&mut self) {
        let Some(period) = self.config.keep_alive else {
            return;
        };
        if self.keep_alive.is_some() {
            return;
        }
        let sender = self.sender.clone();
        let root = self.root.clone();
        let task = async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    biased;
                    () = root.cancelled() => break,
                    _ = ticker.tick() => sender.send(None, MessageType::KeepAlive, None).await,
                }
            }
        };
        self.keep_alive = Some(tokio::spawn(task.in_current_span()));
    }

    async fn on_start(&mut self, msg: &OperationMessage) {
        let Some(id) = msg.operation_id() else {
            let err = ProtocolError::MissingId {
                message_type: MessageType::Start,
            };
            return self.reject(None, MessageType::ConnectionError, &err).await;
        };
        let request: StartPayload = match msg.decode_payload() {
            Ok(request) => request,
            Err(err) => {
                return self
                    .reject(Some(id), MessageType::ConnectionError, &err)
                    .await;
            }
        };
        if let Err(err) = self.operations.ensure_available(id) {
            return self.reject(Some(id), MessageType::Error, &err).await;
        }

        let token = self.root.child_token();
        let ctx = self.context(Some(id), token.clone());
        let span = info_span!("operation", operation_id = id, request_id = %ctx.request_id);

        let subscribed = self
            .bounded("subscribe", self.service.subscribe(ctx, request))
            .instrument(span.clone())
            .await;
        let stream = match subscribed {
            Some(Ok(Ok(stream))) => stream,
            Some(Ok(Err(err))) => return self.fail_start(id, &token, &err).await,
            Some(Err(err)) => return self.fail_start(id, &token, &err).await,
            None => return token.cancel(),
        };

        let task = tokio::spawn(
            stream_results(id.to_owned(), stream, self.sender.clone(), token.clone())
                .instrument(span),
        );
        metrics::counter!(OPERATIONS_STARTED_TOTAL).increment(1);
        debug!(operation_id = id, "operation started");

        if let Err(err) = self.operations.insert(id.to_owned(), token.clone(), task) {
            token.cancel();
            self.reject(Some(id), MessageType::Error, &err).await;
        }
    }

    async fn fail_start(&self, id: &str, token: &CancellationToken, err: &impl Display) {
        token.cancel();
        warn!(operation_id = id, error = %err, "subscribe failed");
        self.sender
            .send(Some(id), MessageType::Error, Some(ErrorPayload::from_error(err)))
            .await;
        self.sender.send(Some(id), MessageType::Complete, None).await;
    }

    async fn on_stop(&mut self, msg: &OperationMessage) {
        let id = msg.operation_id();
        if let Some(id) = id {
            if self.operations.cancel(id).await {
                debug!(operation_id = id, "operation stopped");
            }
        }
        self.sender.send(id, MessageType::Complete, None).await;
    }

    async fn on_ping(&mut self, msg: &OperationMessage) {
        let request = GraphQLRequest::new(PING_QUERY);
        self.exec_and_pong(msg.operation_id(), request, "ping")
            .await;
    }

    async fn on_receive(&mut self, msg: &OperationMessage) {
        let payload: ReceivePayload = match msg.decode_payload() {
            Ok(payload) => payload,
            Err(err) => {
                return self
                    .reject(msg.operation_id(), MessageType::Error, &err)
                    .await;
            }
        };
        let mut variables = Map::new();
        let _ = variables.insert("id".into(), Value::String(payload.id));
        let request = GraphQLRequest::new(RECEIVE_QUERY).with_variables(variables);
        self.exec_and_pong(msg.operation_id(), request, "receive")
            .await;
    }

    /// Run a one-shot request and reply with its result as `pong`.
    async fn exec_and_pong(&self, id: Option<&str>, request: GraphQLRequest, kind: &'static str) {
        let token = self.root.child_token();
        let _guard = token.clone().drop_guard();
        let ctx = self.context(id, token);

        let response = match self.bounded(kind, self.service.exec(ctx, request)).await {
            Some(Ok(response)) => response,
            Some(Err(err)) => return self.reject(id, MessageType::Error, &err).await,
            None => return,
        };
        match serde_json::to_value(&response) {
            Ok(payload) => {
                self.sender
                    .send(None, MessageType::Pong, Some(payload))
                    .await;
            }
            Err(e) => {
                warn!(error = %e, kind, "failed to encode response");
                self.sender
                    .send(id, MessageType::Error, Some(ErrorPayload::from_error(&e)))
                    .await;
            }
        }
    }

    /// Await `fut` within the execution budget. `None` once the connection
    /// is shutting down.
    async fn bounded<F: Future>(
        &self,
        kind: &'static str,
        fut: F,
    ) -> Option<Result<F::Output, ProtocolError>> {
        let started = Instant::now();
        let budget = self.config.exec_timeout;
        let result = tokio::select! {
            biased;
            () = self.root.cancelled() => return None,
            result = tokio::time::timeout(budget, fut) => {
                result.map_err(|_| ProtocolError::ExecTimeout(budget))
            }
        };
        metrics::histogram!(EXEC_DURATION_SECONDS, "kind" => kind)
            .record(started.elapsed().as_secs_f64());
        Some(result)
    }

    fn context(&self, operation_id: Option<&str>, cancel: CancellationToken) -> OperationContext {
        OperationContext::new(
            self.connection_id.clone(),
            operation_id.map(str::to_owned),
            self.attributes.clone(),
            cancel,
        )
    }

    async fn reject(&self, id: Option<&str>, reply: MessageType, err: &ProtocolError) {
        metrics::counter!(PROTOCOL_ERRORS_TOTAL, "kind" => err.kind()).increment(1);
        warn!(operation_id = id, error = %err, "rejected client message");
        self.sender
            .send(id, reply, Some(ErrorPayload::from_error(err)))
            .await;
    }
}

/// Relay one operation's results until the stream ends or `token` fires.
async fn stream_results<T>(
    id: String,
    mut stream: PayloadStream<T>,
    sender: Sender,
    token: CancellationToken,
) where
    T: Serialize + Send + 'static,
{
    metrics::gauge!(OPERATIONS_ACTIVE).increment(1.0);
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => break,
            next = stream.next() => next,
        };
        let Some(item) = next else {
            debug!("operation completed");
            sender
                .send_scoped(&token, Some(&id), MessageType::Complete, None)
                .await;
            break;
        };
        match serde_json::to_value(&item) {
            Ok(payload) => {
                sender
                    .send_scoped(&token, Some(&id), MessageType::Data, Some(payload))
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "failed to encode result");
                sender
                    .send_scoped(
                        &token,
                        Some(&id),
                        MessageType::Error,
                        Some(ErrorPayload::from_error(&e)),
                    )
                    .await;
            }
        }
    }
    token.cancel();
    metrics::gauge!(OPERATIONS_ACTIVE).decrement(1.0);
}
