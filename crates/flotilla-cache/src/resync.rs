//! Rate-limited retry queue.
//!
//! Items pushed into a [`RetryQueue`] are handed to an async handler by
//! a worker loop; failures re-enqueue with exponential backoff. Used for
//! task resync after effector failures and for deleted-job cleanup.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::debug;

const BASE_DELAY: Duration = Duration::from_millis(10);
const MAX_DELAY: Duration = Duration::from_secs(10);

struct Attempt<T> {
    item: T,
    attempt: u32,
}

/// Producer half; cheap to clone, usable from sync code.
pub struct RetryQueue<T> {
    tx: mpsc::UnboundedSender<Attempt<T>>,
}

impl<T> Clone for RetryQueue<T> {
    fn clone(&self) -> Self {
        RetryQueue {
            tx: self.tx.clone(),
        }
    }
}

impl<T> RetryQueue<T> {
    pub fn new() -> (RetryQueue<T>, RetryWorker<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            RetryQueue { tx: tx.clone() },
            RetryWorker { rx, tx },
        )
    }

    /// Enqueue an item for (re-)processing.
    pub fn push(&self, item: T) {
        let _ = self.tx.send(Attempt { item, attempt: 0 });
    }
}

/// Consumer half: drives the handler until the stop signal fires.
pub struct RetryWorker<T> {
    rx: mpsc::UnboundedReceiver<Attempt<T>>,
    tx: mpsc::UnboundedSender<Attempt<T>>,
}

impl<T: Send + 'static> RetryWorker<T> {
    /// Process items until stopped. The handler returns `Err(item)` to
    /// retry it after backoff.
    pub async fn run<F, Fut>(mut self, mut stop: watch::Receiver<bool>, handler: F)
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<(), T>>,
    {
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    debug!("retry worker stopping");
                    break;
                }
                attempt = self.rx.recv() => {
                    let Some(Attempt { item, attempt }) = attempt else {
                        break;
                    };
                    let delay = backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if let Err(item) = handler(item).await {
                        let _ = self.tx.send(Attempt {
                            item,
                            attempt: attempt.saturating_add(1),
                        });
                    }
                }
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let exp = BASE_DELAY.saturating_mul(1u32 << attempt.min(20));
    exp.min(MAX_DELAY)
}
