//! Parallel dispatch over a fixed-size worker pool
//!
//! Every item runs independently; a failing item only poisons its own slot.
//! Results are index-aligned with the input no matter which worker finishes
//! first.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error};

use super::batch::BatchProcessor;

/// Why an item has no result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The item function returned an error
    Compute(String),
    /// The item function panicked
    Panicked(String),
    /// The item ran past its deadline
    TimedOut(Duration),
    /// Dispatch was cancelled before the item finished
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Compute(msg) => write!(f, "compute failed: {}", msg),
            FailureKind::Panicked(msg) => write!(f, "panicked: {}", msg),
            FailureKind::TimedOut(limit) => write!(f, "timed out after {:?}", limit),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Failure marker stored in the result slot of a failed item
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("item {index} {kind}")]
pub struct ItemFailure {
    pub index: usize,
    pub kind: FailureKind,
}

impl ItemFailure {
    fn new(index: usize, kind: FailureKind) -> Self {
        Self { index, kind }
    }
}

/// Per-item outcome of a parallel dispatch
pub type ItemResult<R> = Result<R, ItemFailure>;

/// Cooperative cancellation signal shared between a caller and a dispatch
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Deadline and cancellation for `process_parallel_async`
#[derive(Debug, Clone, Default)]
pub struct ParallelOptions {
    /// Measured from the moment an item starts running
    pub task_timeout: Option<Duration>,
    pub cancel: CancelToken,
}

impl ParallelOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run one item, turning errors and panics into a failure marker
fn run_item<T, R, E, F>(index: usize, item: T, item_fn: &F) -> ItemResult<R>
where
    E: fmt::Display,
    F: Fn(T) -> Result<R, E>,
{
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| item_fn(item))) {
        Ok(Ok(result)) => return Ok(result),
        Ok(Err(e)) => FailureKind::Compute(e.to_string()),
        Err(payload) => FailureKind::Panicked(panic_message(payload)),
    };

    error!("Error processing item {}: {}", index, outcome);
    Err(ItemFailure::new(index, outcome))
}

impl BatchProcessor {
    /// Run `item_fn` over every item on `max_workers` threads
    ///
    /// Blocks until every item has either produced a result or failed.
    /// There is no deadline here: an item that never returns keeps the call
    /// blocked. Use `process_parallel_async` when that matters.
    pub fn process_parallel<T, R, E, F>(&self, items: Vec<T>, item_fn: F) -> Vec<ItemResult<R>>
    where
        T: Send,
        R: Send,
        E: fmt::Display,
        F: Fn(T) -> Result<R, E> + Sync,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let workers = self.max_workers.min(total);
        debug!("Dispatching {} items over {} workers", total, workers);

        let queue = Mutex::new(items.into_iter().enumerate());
        let slots: Vec<Mutex<Option<ItemResult<R>>>> =
            (0..total).map(|_| Mutex::new(None)).collect();

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let next = queue.lock().next();
                    let Some((index, item)) = next else {
                        break;
                    };
                    let outcome = run_item(index, item, &item_fn);
                    *slots[index].lock() = Some(outcome);
                });
            }
        });

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.into_inner()
                    .unwrap_or(Err(ItemFailure::new(index, FailureKind::Cancelled)))
            })
            .collect()
    }

    /// Async variant of `process_parallel` with deadlines and cancellation
    ///
    /// At most `max_workers` items run at once on tokio's blocking pool. An
    /// item that overruns `options.task_timeout` is marked timed out and no
    /// longer awaited; it keeps its worker slot until it actually returns.
    /// Once `options.cancel` fires, pending items are skipped and in-flight
    /// items stop being awaited.
    pub async fn process_parallel_async<T, R, E, F>(
        &self,
        items: Vec<T>,
        item_fn: F,
        options: ParallelOptions,
    ) -> Vec<ItemResult<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: fmt::Display + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    {
        let item_fn = Arc::new(item_fn);
        let permits = self
            .max_workers
            .min(items.len().max(1))
            .min(Semaphore::MAX_PERMITS);
        let workers = Arc::new(Semaphore::new(permits));
        let mut handles = Vec::with_capacity(items.len());

        debug!(
            "Dispatching {} items over {} async workers (timeout: {:?})",
            items.len(),
            permits,
            options.task_timeout
        );

        for (index, item) in items.into_iter().enumerate() {
            let item_fn = item_fn.clone();
            let workers = workers.clone();
            let cancel = options.cancel.clone();
            let timeout = options.task_timeout;

            handles.push(tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(ItemFailure::new(index, FailureKind::Cancelled));
                    }
                    permit = workers.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return Err(ItemFailure::new(index, FailureKind::Cancelled)),
                    },
                };

                let task = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    run_item(index, item, &*item_fn)
                });

                let joined = match timeout {
                    Some(limit) => tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        joined = tokio::time::timeout(limit, task) => match joined {
                            Ok(joined) => Some(joined),
                            Err(_) => {
                                error!("Item {} timed out after {:?}", index, limit);
                                return Err(ItemFailure::new(index, FailureKind::TimedOut(limit)));
                            }
                        },
                    },
                    None => tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        joined = task => Some(joined),
                    },
                };

                match joined {
                    Some(Ok(outcome)) => outcome,
                    Some(Err(e)) => Err(ItemFailure::new(index, FailureKind::Panicked(e.to_string()))),
                    None => {
                        debug!("Item {} abandoned on cancellation", index);
                        Err(ItemFailure::new(index, FailureKind::Cancelled))
                    }
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ItemFailure::new(index, FailureKind::Panicked(e.to_string()))),
            };
            results.push(outcome);
        }
        results
    }
}
