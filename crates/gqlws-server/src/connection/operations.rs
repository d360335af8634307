//! In-flight operation bookkeeping.
//!
//! Owned by the dispatcher; no locking. Each entry pairs the operation's
//! cancellation token with the task streaming its results.

use std::collections::HashMap;

use gqlws_core::ProtocolError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

struct OperationHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl OperationHandle {
    async fn cancel_and_join(self, id: &str) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!(operation_id = id, "operation task panicked");
            }
        }
    }
}

/// Active operations keyed by client-assigned id.
#[derive(Default)]
pub struct OperationTable {
    ops: HashMap<String, OperationHandle>,
}

impl OperationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `id` may be used for a new operation.
    ///
    /// An entry whose task already finished is dropped, so ids are reusable
    /// after natural completion.
    pub fn ensure_available(&mut self, id: &str) -> Result<(), ProtocolError> {
        if self.is_active(id) {
            return Err(ProtocolError::DuplicateOperation(id.to_owned()));
        }
        let _ = self.ops.remove(id);
        Ok(())
    }

    /// Track a started operation.
    pub fn insert(
        &mut self,
        id: String,
        token: CancellationToken,
        task: JoinHandle<()>,
    ) -> Result<(), ProtocolError> {
        self.ensure_available(&id)?;
        let _ = self.ops.insert(id, OperationHandle { token, task });
        Ok(())
    }

    /// Cancel `id`, wait for its task to exit, and forget it.
    ///
    /// Returns `false` if no such operation was tracked.
    pub async fn cancel(&mut self, id: &str) -> bool {
        match self.ops.remove(id) {
            Some(handle) => {
                handle.cancel_and_join(id).await;
                true
            }
            None => false,
        }
    }

    /// Whether `id` is tracked and still running.
    pub fn is_active(&self, id: &str) -> bool {
        self.ops.get(id).is_some_and(|h| !h.task.is_finished())
    }

    /// Drop entries whose tasks have exited. Returns how many were removed.
    pub fn prune_finished(&mut self) -> usize {
        let before = self.ops.len();
        self.ops.retain(|_, h| !h.task.is_finished());
        before - self.ops.len()
    }

    /// Number of tracked operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether no operations are tracked.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Cancel every operation and wait for all of them to exit.
    pub async fn shutdown(&mut self) {
        let ops: Vec<_> = self.ops.drain().collect();
        for (_, handle) in &ops {
            handle.token.cancel();
        }
        let joins = ops
            .into_iter()
            .map(|(id, handle)| async move { handle.cancel_and_join(&id).await });
        let _ = futures::future::join_all(joins).await;
    }
}
