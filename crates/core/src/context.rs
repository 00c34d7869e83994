//! Work that must outlive the response it was started for.
//!
//! Entry points hand back a [`Background`] bundle next to their primary
//! result. The host is obliged to drive it to completion, either inline with
//! [`Background::wait`] or detached with [`Background::spawn`].

use std::future::Future;
use std::sync::Mutex;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use tokio::task::JoinHandle;

/// Futures the host must keep alive until they resolve.
#[derive(Default)]
pub struct Background {
    tasks: Vec<BoxFuture<'static, ()>>,
}

impl std::fmt::Debug for Background {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Background").field("tasks", &self.tasks.len()).finish()
    }
}

impl Background {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: impl Future<Output = ()> + Send + 'static) {
        self.tasks.push(task.boxed());
    }

    pub fn extend(&mut self, other: Background) {
        self.tasks.extend(other.tasks);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drive every task to completion concurrently.
    pub async fn wait(self) {
        join_all(self.tasks).await;
    }

    /// Detach every task onto the current tokio runtime.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        self.tasks.into_iter().map(tokio::spawn).collect()
    }
}

/// Collects background work while a single event is being handled.
#[derive(Default)]
pub struct FetchContext {
    pending: Mutex<Background>,
}

impl FetchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `task` running after the response has been produced.
    pub fn wait_until(&self, task: impl Future<Output = ()> + Send + 'static) {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(task);
    }

    pub fn into_background(self) -> Background {
        self.pending.into_inner().unwrap_or_else(|p| p.into_inner())
    }
}
