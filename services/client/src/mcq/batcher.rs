//! services/client/src/mcq/batcher.rs
//!
//! Coalesces many small independent requests issued within a short time
//! window into one upstream call, fanning the combined result back out to
//! each original caller.

use crate::error::ServiceError;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Duration;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(50);

type BatchFn<P, R> =
    dyn Fn(Vec<P>) -> BoxFuture<'static, Result<Vec<R>, ServiceError>> + Send + Sync;

/// One queued unit of work: the caller's params and the channel its own
/// result travels back on. Exists only inside the current batch window.
struct BatchItem<P, R> {
    params: P,
    tx: oneshot::Sender<Result<R, ServiceError>>,
}

struct BatchState<P, R> {
    batch: Vec<BatchItem<P, R>>,
    timer: Option<JoinHandle<()>>,
}

/// Batches calls to an async callback that must return results positionally
/// aligned with the params it receives.
pub struct RequestBatcher<P, R> {
    state: Arc<Mutex<BatchState<P, R>>>,
    callback: Arc<BatchFn<P, R>>,
    max_batch_size: usize,
    batch_delay: Duration,
}

impl<P: Send + 'static, R: Send + 'static> RequestBatcher<P, R> {
    pub fn new(
        callback: impl Fn(Vec<P>) -> BoxFuture<'static, Result<Vec<R>, ServiceError>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::with_limits(callback, DEFAULT_MAX_BATCH_SIZE, DEFAULT_BATCH_DELAY)
    }

    pub fn with_limits(
        callback: impl Fn(Vec<P>) -> BoxFuture<'static, Result<Vec<R>, ServiceError>>
            + Send
            + Sync
            + 'static,
        max_batch_size: usize,
        batch_delay: Duration,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(BatchState {
                batch: Vec::new(),
                timer: None,
            })),
            callback: Arc::new(callback),
            max_batch_size,
            batch_delay,
        }
    }

    /// Enqueues one logical unit of work. Resolves or rejects independently
    /// of the other callers batched into the same dispatch.
    pub async fn add(&self, params: P) -> Result<R, ServiceError> {
        let (tx, rx) = oneshot::channel();
        let dispatch_now = {
            let mut state = self.state.lock().unwrap();
            state.batch.push(BatchItem { params, tx });
            if state.batch.len() >= self.max_batch_size {
                // A size-triggered dispatch supersedes the pending delay
                // timer; cancel it so it cannot fire an empty dispatch.
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                true
            } else {
                if state.timer.is_none() {
                    state.timer = Some(self.spawn_timer());
                }
                false
            }
        };

        if dispatch_now {
            tokio::spawn(Self::dispatch(
                Arc::clone(&self.state),
                Arc::clone(&self.callback),
            ));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::generation_failed(
                "batch was dropped before completion",
            )),
        }
    }

    fn spawn_timer(&self) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let callback = Arc::clone(&self.callback);
        let delay = self.batch_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Self::dispatch(state, callback).await;
        })
    }

    async fn dispatch(state: Arc<Mutex<BatchState<P, R>>>, callback: Arc<BatchFn<P, R>>) {
        // Swap the open batch for an empty one before awaiting anything, so
        // `add` calls arriving during the async callback populate the next
        // batch and never the one in flight. The timer handle is dropped
        // without aborting: when the timer itself triggered this dispatch,
        // aborting would cancel the dispatch mid-flight.
        let items = {
            let mut state = state.lock().unwrap();
            state.timer = None;
            std::mem::take(&mut state.batch)
        };
        if items.is_empty() {
            return;
        }

        let (params, senders): (Vec<P>, Vec<oneshot::Sender<Result<R, ServiceError>>>) =
            items.into_iter().map(|item| (item.params, item.tx)).unzip();
        let expected = senders.len();

        match callback(params).await {
            Ok(results) if results.len() == expected => {
                for (tx, result) in senders.into_iter().zip(results) {
                    let _ = tx.send(Ok(result));
                }
            }
            Ok(results) => {
                let error = ServiceError::generation_failed(format!(
                    "batch callback returned {} results for {} requests",
                    results.len(),
                    expected
                ));
                for tx in senders {
                    let _ = tx.send(Err(error.clone()));
                }
            }
            Err(error) => {
                for tx in senders {
                    let _ = tx.send(Err(error.clone()));
                }
            }
        }
    }
}
