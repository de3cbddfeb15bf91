//! Tokio-backed scheduler implementation
//!
//! Each registration spawns an abortable task that sleeps until its fire
//! time. Cancellation aborts the task and drops the bookkeeping entry.
//! Completed one-shot tasks clean their own entry up on fire.

use super::{Scheduler, TimerCallback, TimerHandle};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Scheduler running callbacks on spawned tokio timer tasks
pub struct TokioScheduler {
    tasks: Arc<Mutex<HashMap<TimerHandle, JoinHandle<()>>>>,
}

impl TokioScheduler {
    /// Create a new scheduler; must be called within a tokio runtime
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of live registrations (for diagnostics)
    pub fn active(&self) -> usize {
        lock(&self.tasks).len()
    }

    fn register(&self, handle: TimerHandle, task: JoinHandle<()>) {
        lock(&self.tasks).insert(handle, task);
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A poisoned lock only means a timer task panicked mid-insert; the map
    // itself stays usable.
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn delay_until(when: DateTime<Local>) -> Duration {
    (when - Local::now()).to_std().unwrap_or(Duration::ZERO)
}

fn cleanup(tasks: &Weak<Mutex<HashMap<TimerHandle, JoinHandle<()>>>>, handle: &TimerHandle) {
    if let Some(tasks) = tasks.upgrade() {
        lock(&tasks).remove(handle);
    }
}

impl Scheduler for TokioScheduler {
    fn run_at(&self, when: DateTime<Local>, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::new();
        trace!("scheduling one-shot timer {} at {}", handle, when);

        let tasks = Arc::downgrade(&self.tasks);
        let task_handle = handle.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay_until(when)).await;
            callback().await;
            cleanup(&tasks, &task_handle);
        });

        self.register(handle.clone(), task);
        handle
    }

    fn run_every(
        &self,
        start: DateTime<Local>,
        every: Duration,
        callback: TimerCallback,
    ) -> TimerHandle {
        let handle = TimerHandle::new();
        trace!(
            "scheduling repeating timer {} at {} every {:?}",
            handle,
            start,
            every
        );

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay_until(start)).await;
            let mut ticks = tokio::time::interval(every);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                callback().await;
            }
        });

        self.register(handle.clone(), task);
        handle
    }

    fn cancel(&self, handle: &TimerHandle) {
        if let Some(task) = lock(&self.tasks).remove(handle) {
            debug!("cancelling timer {}", handle);
            task.abort();
        }
    }
}
