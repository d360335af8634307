//! In-memory transport and service doubles for connection tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gqlws_core::{
    GraphQLRequest, GraphQLService, OperationContext, OperationMessage, PayloadStream,
    ServiceError, TransportError,
};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::transport::{FrameReader, FrameWriter};
use super::{Connection, ConnectionOutcome};
use crate::config::ConnectionConfig;

const WAIT: Duration = Duration::from_secs(5);

// ── Transport ───────────────────────────────────────────────────────

enum Inbound {
    Frame(String),
    Close,
    Fail,
}

/// Reader fed by a [`ReaderHandle`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

/// Pushes inbound frames into a [`MockReader`].
#[derive(Clone)]
pub struct ReaderHandle {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl MockReader {
    pub fn new() -> (Self, ReaderHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, ReaderHandle { tx })
    }
}

impl ReaderHandle {
    pub fn send_raw(&self, frame: &str) {
        let _ = self.tx.send(Inbound::Frame(frame.to_owned()));
    }

    pub fn send_json(&self, value: &Value) {
        self.send_raw(&value.to_string());
    }

    pub fn close(&self) {
        let _ = self.tx.send(Inbound::Close);
    }

    pub fn fail(&self) {
        let _ = self.tx.send(Inbound::Fail);
    }
}

#[async_trait]
impl FrameReader for MockReader {
    async fn read_frame(&mut self) -> Result<Option<String>, TransportError> {
        match self.rx.recv().await {
            Some(Inbound::Frame(frame)) => Ok(Some(frame)),
            Some(Inbound::Close) | None => Ok(None),
            Some(Inbound::Fail) => Err(TransportError::WebSocket("connection reset".into())),
        }
    }
}

struct ProbeState {
    frames: Mutex<Vec<String>>,
    count: watch::Sender<usize>,
    closes: AtomicUsize,
    fail: AtomicBool,
    stall: AtomicBool,
    stall_close: AtomicBool,
}

/// Observes everything written to a [`MockWriter`].
#[derive(Clone)]
pub struct WriterProbe {
    state: Arc<ProbeState>,
}

/// Writer that records frames.
pub struct MockWriter {
    state: Arc<ProbeState>,
}

impl MockWriter {
    pub fn new() -> (Self, WriterProbe) {
        let state = Arc::new(ProbeState {
            frames: Mutex::new(Vec::new()),
            count: watch::Sender::new(0),
            closes: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            stall: AtomicBool::new(false),
            stall_close: AtomicBool::new(false),
        });
        (
            Self {
                state: state.clone(),
            },
            WriterProbe { state },
        )
    }
}

#[async_trait]
impl FrameWriter for MockWriter {
    async fn write_frame(&mut self, frame: String) -> Result<(), TransportError> {
        if self.state.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(TransportError::WebSocket("broken pipe".into()));
        }
        let len = {
            let mut frames = self.state.frames.lock();
            frames.push(frame);
            frames.len()
        };
        let _ = self.state.count.send_replace(len);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let _ = self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.stall_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

impl WriterProbe {
    pub fn frames(&self) -> Vec<String> {
        self.state.frames.lock().clone()
    }

    pub fn messages(&self) -> Vec<OperationMessage> {
        self.frames()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    /// Messages as `(id, type)` pairs, for compact assertions.
    pub fn summary(&self) -> Vec<(Option<String>, String)> {
        self.messages()
            .into_iter()
            .map(|m| (m.id, m.message_type.to_string()))
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self) {
        self.state.fail.store(true, Ordering::SeqCst);
    }

    pub fn stall_writes(&self) {
        self.state.stall.store(true, Ordering::SeqCst);
    }

    pub fn stall_close(&self) {
        self.state.stall_close.store(true, Ordering::SeqCst);
    }

    pub async fn wait_for_frames(&self, n: usize) {
        let mut rx = self.state.count.subscribe();
        tokio::time::timeout(WAIT, rx.wait_for(|len| *len >= n))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {n} frames: {:?}", self.frames()))
            .unwrap();
    }

    /// Wait until `n` messages matching `pred` have been written.
    pub async fn wait_for_count(&self, n: usize, pred: impl Fn(&OperationMessage) -> bool) {
        let mut rx = self.state.count.subscribe();
        let found = tokio::time::timeout(WAIT, async {
            while self.messages().iter().filter(|m| pred(m)).count() < n {
                rx.changed().await.unwrap();
            }
        })
        .await;
        found.unwrap_or_else(|_| panic!("timed out waiting for {n} messages: {:?}", self.frames()));
    }

    /// Wait until a message matching `pred` has been written and return it.
    pub async fn wait_for(&self, pred: impl Fn(&OperationMessage) -> bool) -> OperationMessage {
        let mut rx = self.state.count.subscribe();
        let found = tokio::time::timeout(WAIT, async {
            loop {
                if let Some(m) = self.messages().into_iter().find(|m| pred(m)) {
                    return m;
                }
                rx.changed().await.unwrap();
            }
        })
        .await;
        found.unwrap_or_else(|_| panic!("timed out waiting for message: {:?}", self.frames()))
    }
}

// ── Service ─────────────────────────────────────────────────────────

/// Subscription result; `Broken` fails to serialize.
pub enum TestPayload {
    Value(Value),
    Broken,
}

impl Serialize for TestPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => v.serialize(serializer),
            Self::Broken => Err(serde::ser::Error::custom("cannot encode payload")),
        }
    }
}

/// Service whose behavior is chosen by the query text:
///
/// - `subscription { feed }`: results pushed with [`TestService::feed`]
/// - `subscription { count }`: `variables.n` results, then completes
/// - `subscription { broken }`: one unencodable result, one good one, completes
/// - `subscription { fail }`: `subscribe` returns an error
/// - `subscription { hang }`: `subscribe` never returns
#[derive(Default)]
pub struct TestService {
    feeds: Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>,
    contexts: Mutex<Vec<OperationContext>>,
    exec_requests: Mutex<Vec<GraphQLRequest>>,
    hang_exec: AtomicBool,
}

impl TestService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn feed(&self, operation_id: &str, value: Value) {
        if let Some(tx) = self.feeds.lock().get(operation_id) {
            let _ = tx.send(value);
        }
    }

    pub fn end_feed(&self, operation_id: &str) {
        let _ = self.feeds.lock().remove(operation_id);
    }

    pub fn contexts(&self) -> Vec<OperationContext> {
        self.contexts.lock().clone()
    }

    pub fn exec_requests(&self) -> Vec<GraphQLRequest> {
        self.exec_requests.lock().clone()
    }

    pub fn hang_exec(&self) {
        self.hang_exec.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl GraphQLService for TestService {
    type Payload = TestPayload;
    type Response = Value;

    async fn subscribe(
        &self,
        ctx: OperationContext,
        request: GraphQLRequest,
    ) -> Result<PayloadStream<TestPayload>, ServiceError> {
        let operation_id = ctx.operation_id.clone().unwrap_or_default();
        self.contexts.lock().push(ctx);

        match request.query.as_str() {
            "subscription { feed }" => {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let _ = self.feeds.lock().insert(operation_id, tx);
                Ok(Box::pin(async_stream::stream! {
                    while let Some(v) = rx.recv().await {
                        yield TestPayload::Value(v);
                    }
                }))
            }
            "subscription { count }" => {
                let n = request
                    .variables
                    .as_ref()
                    .and_then(|v| v.get("n"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let items: Vec<_> = (0..n)
                    .map(|i| TestPayload::Value(json!({"data": {"count": i}})))
                    .collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            "subscription { broken }" => Ok(Box::pin(futures::stream::iter(vec![
                TestPayload::Broken,
                TestPayload::Value(json!({"data": {"ok": true}})),
            ]))),
            "subscription { fail }" => Err(ServiceError::rejected("subscription rejected")),
            "subscription { hang }" => std::future::pending().await,
            other => Err(ServiceError::rejected(format!("unknown query: {other}"))),
        }
    }

    async fn exec(&self, _ctx: OperationContext, request: GraphQLRequest) -> Value {
        self.exec_requests.lock().push(request.clone());
        if self.hang_exec.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        json!({"data": {"query": request.query, "variables": request.variables}})
    }
}

// ── Harness ─────────────────────────────────────────────────────────

/// A connection served over the in-memory transport.
pub struct Harness {
    pub input: ReaderHandle,
    pub output: WriterProbe,
    pub service: Arc<TestService>,
    pub parent: CancellationToken,
    pub root: CancellationToken,
    pub task: JoinHandle<ConnectionOutcome>,
}

impl Harness {
    pub fn start(config: ConnectionConfig) -> Self {
        let (reader, input) = MockReader::new();
        let (writer, output) = MockWriter::new();
        let service = TestService::new();
        let parent = CancellationToken::new();
        let connection = Connection::new(service.clone(), &parent, config);
        let root = connection.cancel_handle();
        let task = tokio::spawn(connection.serve(reader, writer));
        Self {
            input,
            output,
            service,
            parent,
            root,
            task,
        }
    }

    pub fn send(&self, value: Value) {
        self.input.send_json(&value);
    }

    pub async fn init(&self) {
        self.send(json!({"type": "connection_init"}));
        let _ = self
            .output
            .wait_for(|m| m.message_type == gqlws_core::MessageType::ConnectionAck)
            .await;
    }

    pub async fn finish(self) -> ConnectionOutcome {
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("connection did not finish")
            .expect("connection task panicked")
    }
}
