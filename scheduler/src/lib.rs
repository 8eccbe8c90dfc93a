//! Keyed, cancellable delayed jobs.
//!
//! A [`Scheduler`] holds at most one pending job per key. Each job is a tokio
//! task that sleeps until its deadline, then removes its own entry from the
//! pending map and only afterwards runs the action. Removal is the single
//! decision point shared with [`Scheduler::cancel`]:
//!
//! ```text
//! schedule(k) ──► pending[k] = gen N ──► sleep ──► lock: pending[k] is gen N?
//!                                                   ├─ yes: remove, unlock, run action
//!                                                   └─ no:  return (cancelled/replaced)
//! cancel(k)   ──► lock: remove pending[k] ──► abort timer, true
//!                       (absent)          ──► false
//! ```
//!
//! Whoever removes the entry first wins. A `cancel` that loses the race
//! returns `false` and never interrupts an action that has already started;
//! a timer that loses the race never runs its action.
//!
//! # Failures
//!
//! Actions are fire-and-forget. Errors and panics go to a [`FailureSink`]
//! (tracing by default) and are never retried. The key is already gone from
//! the pending set by then, so a failed job cannot stay stuck.
//!
//! # Time
//!
//! Deadlines use tokio's clock, so tests drive the scheduler with a paused
//! runtime and `tokio::time::advance` instead of real sleeps.

mod sink;

pub use sink::{FailureSink, JobFailure, LogSink};

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Delay before an automatic PR analysis fires.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler must be started inside a tokio runtime")]
    NoRuntime,
    #[error("scheduler has been shut down")]
    Closed,
    #[error("delay of {0:?} is too long to schedule")]
    DelayTooLong(Duration),
}

/// Trait alias for scheduler keys.
pub trait JobKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T: Eq + Hash + Clone + Debug + Send + Sync + 'static> JobKey for T {}

struct PendingJob {
    generation: u64,
    fire_at: Instant,
    timer: JoinHandle<()>,
}

struct Jobs<K> {
    pending: HashMap<K, PendingJob>,
    next_generation: u64,
    closed: bool,
}

struct Shared<K> {
    jobs: Mutex<Jobs<K>>,
    sink: Arc<dyn FailureSink<K>>,
    runtime: Handle,
}

impl<K: JobKey> Shared<K> {
    fn lock(&self) -> MutexGuard<'_, Jobs<K>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the job for firing if it is still the current generation.
    fn claim(&self, key: &K, generation: u64) -> bool {
        let mut jobs = self.lock();
        match jobs.pending.get(key) {
            Some(job) if job.generation == generation => {
                // Dropping our own JoinHandle detaches; it does not abort.
                jobs.pending.remove(key);
                true
            }
            _ => false,
        }
    }

    async fn run<F, Fut>(&self, key: K, action: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        tracing::debug!(?key, "Scheduled job firing");
        let outcome = AssertUnwindSafe(async move { action().await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => tracing::debug!(?key, "Scheduled job completed"),
            Ok(Err(error)) => self.sink.report(&key, &JobFailure::Error(error)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.sink.report(&key, &JobFailure::Panicked(message));
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Keyed delayed-job scheduler. Cheap to clone; clones share state.
pub struct Scheduler<K> {
    shared: Arc<Shared<K>>,
    delay: Duration,
}

impl<K> Clone for Scheduler<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            delay: self.delay,
        }
    }
}

impl<K: JobKey> Scheduler<K> {
    /// Start a scheduler on the current tokio runtime, logging job failures.
    pub fn start(delay: Duration) -> Result<Self, SchedulerError> {
        Self::start_with_sink(delay, Arc::new(LogSink))
    }

    pub fn start_with_sink(
        delay: Duration,
        sink: Arc<dyn FailureSink<K>>,
    ) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        Ok(Self {
            shared: Arc::new(Shared {
                jobs: Mutex::new(Jobs {
                    pending: HashMap::new(),
                    next_generation: 0,
                    closed: false,
                }),
                sink,
                runtime,
            }),
            delay,
        })
    }

    /// Default delay used by [`Scheduler::schedule`].
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm `action` for `key` after the default delay, replacing any pending job.
    pub fn schedule<F, Fut>(&self, key: K, action: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.schedule_with_delay(key, self.delay, action)
    }

    /// Arm `action` for `key` after `delay`, replacing any pending job.
    pub fn schedule_with_delay<F, Fut>(
        &self,
        key: K,
        delay: Duration,
        action: F,
    ) -> Result<(), SchedulerError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let fire_at = Instant::now()
            .checked_add(delay)
            .ok_or(SchedulerError::DelayTooLong(delay))?;
        let mut jobs = self.shared.lock();
        if jobs.closed {
            return Err(SchedulerError::Closed);
        }

        let replaced = jobs.pending.remove(&key).map(|old| old.timer.abort()).is_some();

        let generation = jobs.next_generation;
        jobs.next_generation += 1;

        // Spawned under the lock: the task cannot claim its entry before it exists.
        let shared = Arc::clone(&self.shared);
        let task_key = key.clone();
        let timer = self.shared.runtime.spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            if shared.claim(&task_key, generation) {
                shared.run(task_key, action).await;
            }
        });

        jobs.pending.insert(
            key.clone(),
            PendingJob {
                generation,
                fire_at,
                timer,
            },
        );
        drop(jobs);

        tracing::debug!(?key, ?delay, replaced, "Job scheduled");
        Ok(())
    }

    /// Cancel the pending job for `key`.
    ///
    /// Returns `false` if nothing was pending, including when the job has
    /// already been claimed for firing.
    pub fn cancel(&self, key: &K) -> bool {
        let removed = self.shared.lock().pending.remove(key);
        match removed {
            Some(job) => {
                job.timer.abort();
                tracing::debug!(?key, "Job cancelled");
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.shared.lock().pending.contains_key(key)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Time left before the pending job for `key` fires.
    #[must_use]
    pub fn time_remaining(&self, key: &K) -> Option<Duration> {
        self.shared
            .lock()
            .pending
            .get(key)
            .map(|job| job.fire_at.saturating_duration_since(Instant::now()))
    }

    /// Close the scheduler and drop every pending job.
    ///
    /// Actions that already started keep running. Returns the number of
    /// pending jobs that were drained. Later `schedule` calls fail with
    /// [`SchedulerError::Closed`].
    pub fn shutdown(&self) -> usize {
        let drained: Vec<(K, PendingJob)> = {
            let mut jobs = self.shared.lock();
            jobs.closed = true;
            jobs.pending.drain().collect()
        };
        for (_, job) in &drained {
            job.timer.abort();
        }
        if !drained.is_empty() {
            tracing::info!(drained = drained.len(), "Scheduler shut down with pending jobs");
        }
        drained.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl<K: JobKey> Debug for Scheduler<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let jobs = self.shared.lock();
        f.debug_struct("Scheduler")
            .field("delay", &self.delay)
            .field("pending", &jobs.pending.len())
            .field("closed", &jobs.closed)
            .finish_non_exhaustive()
    }
}
