//! Debounced queue of deferred work.
//!
//! Tasks are queued with [`IdleScheduler::schedule`] and run only after request
//! traffic has been quiet for `delay`. Each [`IdleScheduler::trigger`]
//! supersedes the previous pending timer, but the wait is capped so the oldest
//! queued task never waits more than `max_delay`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::Error;
use crate::adapter::Clock;
use crate::debug::DebugLog;

/// Default quiet period before idle tasks run.
pub const IDLE_DELAY: Duration = Duration::from_millis(5_000);
/// Ceiling on how long a queued task may wait.
pub const MAX_IDLE_DELAY: Duration = Duration::from_millis(30_000);

/// Deferred unit of work.
pub type IdleTask = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), Error>> + Send>;

struct Queued {
    desc: String,
    run: IdleTask,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Queued>,
    /// Bumped on every trigger; a sleeping trigger whose generation is stale
    /// has been superseded.
    generation: u64,
    last_trigger: Option<i64>,
    last_run: Option<i64>,
    oldest_scheduled_at: Option<i64>,
}

pub struct IdleScheduler {
    clock: Arc<dyn Clock>,
    delay: Duration,
    max_delay: Duration,
    debug: Arc<DebugLog>,
    state: Mutex<QueueState>,
    draining: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for IdleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleScheduler")
            .field("delay", &self.delay)
            .field("max_delay", &self.max_delay)
            .field("tasks", &self.task_descriptions())
            .finish()
    }
}

impl IdleScheduler {
    pub fn new(clock: Arc<dyn Clock>, delay: Duration, max_delay: Duration, debug: Arc<DebugLog>) -> Self {
        Self {
            clock,
            delay,
            max_delay,
            debug,
            state: Mutex::new(QueueState::default()),
            draining: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Append a task. It runs on the next drain.
    pub fn schedule(&self, desc: impl Into<String>, run: IdleTask) {
        let desc = desc.into();
        tracing::debug!(task = %desc, "idle task scheduled");
        let now = self.clock.now_ms();
        let mut state = self.lock();
        state.queue.push_back(Queued { desc, run });
        if state.oldest_scheduled_at.is_none() {
            state.oldest_scheduled_at = Some(now);
        }
    }

    /// Signal activity. Resolves once the queue has been drained by this call,
    /// or immediately when it was superseded or there was nothing to do.
    pub async fn trigger(&self) {
        let now = self.clock.now_ms();
        let (generation, wait) = {
            let mut state = self.lock();
            state.last_trigger = Some(now);
            if state.queue.is_empty() {
                return;
            }
            state.generation += 1;

            let oldest = state.oldest_scheduled_at.unwrap_or(now);
            let ceiling = (oldest + self.max_delay.as_millis() as i64 - now).max(0) as u64;
            let wait = Duration::from_millis(ceiling).min(self.delay);
            (state.generation, wait)
        };

        tokio::time::sleep(wait).await;

        if self.lock().generation != generation {
            return;
        }
        self.execute().await;
    }

    /// Run every queued task serially, including ones queued mid-drain.
    pub async fn execute(&self) {
        let _drain = self.draining.lock().await;
        self.lock().last_run = Some(self.clock.now_ms());

        loop {
            let batch: Vec<Queued> = self.lock().queue.drain(..).collect();
            if batch.is_empty() {
                break;
            }
            for task in batch {
                tracing::debug!(task = %task.desc, "running idle task");
                if let Err(err) = (task.run)().await {
                    tracing::warn!(task = %task.desc, "idle task failed: {err}");
                    self.debug.log(&err, &format!("while running idle task {}", task.desc));
                }
            }
        }

        self.lock().oldest_scheduled_at = None;
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn task_descriptions(&self) -> Vec<String> {
        self.lock().queue.iter().map(|t| t.desc.clone()).collect()
    }

    pub fn last_trigger(&self) -> Option<i64> {
        self.lock().last_trigger
    }

    pub fn last_run(&self) -> Option<i64> {
        self.lock().last_run
    }
}
