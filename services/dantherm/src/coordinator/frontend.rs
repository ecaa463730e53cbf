//! Frontend command queue
//!
//! User-visible operations run strictly one at a time. After each command
//! the worker waits until every backend write it queued has reached the
//! device before resolving the handle and starting the next command.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use errors::{DanthermError, DanthermResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::BackendQueue;

type CommandOp = Box<dyn FnOnce() -> BoxFuture<'static, DanthermResult<()>> + Send>;

struct Command {
    name: String,
    op: CommandOp,
    done: oneshot::Sender<DanthermResult<()>>,
}

/// Completion of a queued command
#[derive(Debug)]
pub struct CommandHandle {
    rx: oneshot::Receiver<DanthermResult<()>>,
}

impl CommandHandle {
    /// Handle that is already resolved
    pub fn ready(result: DanthermResult<()>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    pub async fn wait(self) -> DanthermResult<()> {
        self.rx.await.unwrap_or_else(|_| {
            Err(DanthermError::QueueClosed(
                "frontend queue stopped before the command ran".to_string(),
            ))
        })
    }
}

/// Submission side
#[derive(Clone)]
pub struct FrontendQueue {
    tx: mpsc::UnboundedSender<Command>,
}

/// Consumer side, run once by the coordinator
pub struct FrontendWorker {
    rx: mpsc::UnboundedReceiver<Command>,
    backend: BackendQueue,
    drain_poll: Duration,
}

/// Create a connected queue/worker pair
///
/// The worker polls the backend at half the inter-write delay while waiting
/// for it to drain.
pub fn frontend_queue(
    backend: BackendQueue,
    write_delay: Duration,
) -> (FrontendQueue, FrontendWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let drain_poll = (write_delay / 2).max(Duration::from_millis(1));
    (
        FrontendQueue { tx },
        FrontendWorker {
            rx,
            backend,
            drain_poll,
        },
    )
}

impl FrontendQueue {
    pub fn enqueue<F, Fut>(&self, name: impl Into<String>, op: F) -> CommandHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = DanthermResult<()>> + Send + 'static,
    {
        let (done, rx) = oneshot::channel();
        let command = Command {
            name: name.into(),
            op: Box::new(move || op().boxed()),
            done,
        };
        if let Err(mpsc::error::SendError(command)) = self.tx.send(command) {
            let _ = command.done.send(Err(DanthermError::QueueClosed(format!(
                "frontend queue is not running ({})",
                command.name
            ))));
        }
        CommandHandle { rx }
    }
}

impl FrontendWorker {
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Frontend queue started");
        loop {
            let command = tokio::select! {
                next = self.rx.recv() => match next {
                    Some(command) => command,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            };
            let Command { name, op, done } = command;

            debug!("Running command {}", name);
            let result = AssertUnwindSafe(async move { op().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(DanthermError::Internal(format!("command {} panicked", name)))
                });
            if let Err(e) = &result {
                warn!("Command {} failed: {}", name, e);
            }

            if !self.wait_for_drain(&cancel).await {
                let _ = done.send(Err(DanthermError::QueueClosed(format!(
                    "stopped while writes of {} were pending",
                    name
                ))));
                break;
            }
            let _ = done.send(result);
        }
        info!("Frontend queue stopped");
    }

    /// False when cancelled before the backend drained
    async fn wait_for_drain(&self, cancel: &CancellationToken) -> bool {
        while !self.backend.is_drained() {
            tokio::select! {
                _ = tokio::time::sleep(self.drain_poll) => {},
                _ = cancel.cancelled() => return false,
            }
        }
        true
    }
}
