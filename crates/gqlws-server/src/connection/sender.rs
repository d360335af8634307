//! Write loop.
//!
//! One task owns the [`FrameWriter`]; everything else talks to it through a
//! [`Sender`]. The writer is closed exactly once, when the task exits.

use std::time::Duration;

use gqlws_core::{MessageType, OperationMessage, TransportError};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::transport::FrameWriter;
use crate::metrics::FRAMES_SENT_TOTAL;

/// Handle for queueing outbound messages.
///
/// Cheap to clone and safe to use from any task.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<OperationMessage>,
    root: CancellationToken,
}

impl Sender {
    /// Queue a message. Waits until the write loop accepts it, or returns
    /// without sending once the connection is shutting down.
    pub async fn send(&self, id: Option<&str>, message_type: MessageType, payload: Option<Value>) {
        let msg = OperationMessage::new(id.map(str::to_owned), message_type, payload);
        tokio::select! {
            biased;
            () = self.root.cancelled() => {}
            _ = self.tx.send(msg) => {}
        }
    }

    /// Like [`send`](Self::send), but also gives up when `scope` fires.
    pub async fn send_scoped(
        &self,
        scope: &CancellationToken,
        id: Option<&str>,
        message_type: MessageType,
        payload: Option<Value>,
    ) {
        let msg = OperationMessage::new(id.map(str::to_owned), message_type, payload);
        tokio::select! {
            biased;
            () = self.root.cancelled() => {}
            () = scope.cancelled() => {}
            _ = self.tx.send(msg) => {}
        }
    }
}

/// Spawn the write loop for `writer`.
///
/// The task runs until `root` is cancelled or a write fails. A failed or
/// timed-out write cancels `root`. Closing the writer is bounded by the same
/// timeout.
pub fn spawn<W: FrameWriter>(
    writer: W,
    root: CancellationToken,
    write_timeout: Duration,
) -> (Sender, JoinHandle<Result<(), TransportError>>) {
    let (tx, rx) = mpsc::channel(1);
    let sender = Sender {
        tx,
        root: root.clone(),
    };
    let task = tokio::spawn(write_loop(writer, rx, root, write_timeout));
    (sender, task)
}

async fn write_loop<W: FrameWriter>(
    mut writer: W,
    mut rx: mpsc::Receiver<OperationMessage>,
    root: CancellationToken,
    write_timeout: Duration,
) -> Result<(), TransportError> {
    let result = loop {
        let msg = tokio::select! {
            biased;
            () = root.cancelled() => break Ok(()),
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break Ok(()),
            },
        };

        let frame = match msg.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, message_type = %msg.message_type, "failed to encode outbound message");
                continue;
            }
        };

        match tokio::time::timeout(write_timeout, writer.write_frame(frame)).await {
            Ok(Ok(())) => {
                metrics::counter!(FRAMES_SENT_TOTAL).increment(1);
            }
            Ok(Err(e)) => break Err(e),
            Err(_) => break Err(TransportError::WriteTimeout(write_timeout)),
        }
    };

    if let Err(e) = &result {
        warn!(error = %e, "write failed, closing connection");
        root.cancel();
    }
    match tokio::time::timeout(write_timeout, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "error closing transport"),
        Err(_) => warn!(
            timeout = ?write_timeout,
            "timed out closing transport"
        ),
    }
    result
}
