//! Backend write queue
//!
//! Register writes are drained one at a time by a single consumer task,
//! under the shared poll/write lock and with a fixed pause after each write
//! so the unit is never written faster than it can handle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use errors::{DanthermError, DanthermResult};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Sink for encoded register writes
#[async_trait]
pub trait RegisterWriter: Send + Sync {
    async fn write_registers(&self, address: u16, words: &[u16]) -> DanthermResult<()>;
}

/// One queued write
#[derive(Debug)]
pub struct PendingWrite {
    pub address: u16,
    pub words: Vec<u16>,
    done: oneshot::Sender<DanthermResult<()>>,
}

/// Completion of a queued write
#[derive(Debug)]
pub struct WriteHandle {
    rx: oneshot::Receiver<DanthermResult<()>>,
}

impl WriteHandle {
    pub async fn wait(self) -> DanthermResult<()> {
        self.rx.await.unwrap_or_else(|_| {
            Err(DanthermError::QueueClosed(
                "backend queue stopped before the write ran".to_string(),
            ))
        })
    }
}

#[derive(Debug, Default)]
struct Shared {
    queue: Mutex<VecDeque<PendingWrite>>,
    wake: Notify,
    /// Queued plus in-flight writes
    pending: AtomicUsize,
}

/// Handle to the backend queue; clones share one queue
#[derive(Debug, Clone, Default)]
pub struct BackendQueue {
    shared: Arc<Shared>,
}

impl BackendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, address: u16, words: Vec<u16>) -> WriteHandle {
        let (done, rx) = oneshot::channel();
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        self.shared.queue.lock().push_back(PendingWrite {
            address,
            words,
            done,
        });
        self.shared.wake.notify_one();
        WriteHandle { rx }
    }

    /// No write is queued or executing
    pub fn is_drained(&self) -> bool {
        self.shared.pending.load(Ordering::SeqCst) == 0
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start the consumer task
    pub fn spawn(
        &self,
        writer: Arc<dyn RegisterWriter>,
        rw_lock: Arc<tokio::sync::Mutex<()>>,
        write_delay: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            info!("Backend queue started (write delay {:?})", write_delay);
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let next = shared.queue.lock().pop_front();
                let write = match next {
                    Some(write) => write,
                    None => {
                        tokio::select! {
                            _ = shared.wake.notified() => {},
                            _ = cancel.cancelled() => break,
                        }
                        continue;
                    },
                };

                let guard = rw_lock.lock().await;
                debug!(
                    "Writing {} word(s) to register {}",
                    write.words.len(),
                    write.address
                );
                let result = writer.write_registers(write.address, &write.words).await;
                if let Err(e) = &result {
                    error!("Write to register {} failed: {}", write.address, e);
                }
                // Caller may have dropped the handle
                let _ = write.done.send(result);
                shared.pending.fetch_sub(1, Ordering::SeqCst);

                tokio::time::sleep(write_delay).await;
                drop(guard);
            }
            info!("Backend queue stopped");
        })
    }
}
