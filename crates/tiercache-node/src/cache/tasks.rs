//! Fire-and-forget background work: stale refreshes and delayed invalidation.
//!
//! Tasks are tracked so tests and shutdown code can observe them, and bounded
//! by a semaphore so a burst of stale reads cannot spawn unbounded reloads.
//! Nothing here is awaited by the code that triggers it, failures stay inside
//! the task, and whatever is still running when the process exits is simply
//! abandoned. Lock TTLs bound the damage of an abandoned refresh.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// A background slot taken ahead of time with [`BackgroundTasks::try_reserve`].
pub struct Reservation(OwnedSemaphorePermit);

#[derive(Clone)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
}

impl BackgroundTasks {
    /// At most `max_concurrent` tasks run at once; the rest queue for a permit.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Spawn a detached task. The caller gets no handle and no result.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.tracker.spawn(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                task.await;
            }
            .instrument(tracing::debug_span!("background", task = name)),
        );
    }

    /// Spawn a task that waits out `delay` before queueing for a permit, so
    /// a sleeping task never holds a slot.
    pub fn spawn_after<F>(&self, name: &'static str, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.tracker.spawn(
            async move {
                tokio::time::sleep(delay).await;
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                task.await;
            }
            .instrument(tracing::debug_span!("background", task = name)),
        );
    }

    /// Take a slot now if one is free. `None` means the budget is exhausted.
    pub fn try_reserve(&self) -> Option<Reservation> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .ok()
            .map(Reservation)
    }

    /// Spawn a task on a slot reserved earlier; it starts without queueing.
    pub fn spawn_reserved<F>(&self, name: &'static str, slot: Reservation, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(
            async move {
                let _permit = slot.0;
                task.await;
            }
            .instrument(tracing::debug_span!("background", task = name)),
        );
    }

    /// Number of spawned tasks that have not finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every task spawned so far has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
