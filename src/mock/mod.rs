//! Mock implementations for testing
//!
//! A recording framework (every service call and event is captured for
//! assertions) and a manually-driven scheduler (timers fire only when the
//! test says so), standing in for the external home-automation framework.

use crate::error::{HearthError, Result};
use crate::framework::{Framework, Scheduler, StateChange, TimerCallback, TimerHandle};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// One recorded `call_service` invocation
#[derive(Debug, Clone)]
pub struct RecordedServiceCall {
    pub service: String,
    pub payload: Value,
}

/// One recorded `fire_event` invocation
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub event: String,
    pub payload: Value,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Recording mock of the external framework
#[derive(Default)]
pub struct MockFramework {
    service_calls: Mutex<Vec<RecordedServiceCall>>,
    events: Mutex<Vec<RecordedEvent>>,
    listeners: Mutex<HashMap<String, Vec<mpsc::Sender<StateChange>>>>,
    failing_services: Mutex<HashSet<String>>,
}

impl MockFramework {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All service calls recorded so far
    pub fn service_calls(&self) -> Vec<RecordedServiceCall> {
        lock(&self.service_calls).clone()
    }

    /// All events recorded so far
    pub fn events(&self) -> Vec<RecordedEvent> {
        lock(&self.events).clone()
    }

    /// Drop all recordings
    pub fn clear(&self) {
        lock(&self.service_calls).clear();
        lock(&self.events).clear();
    }

    /// Make every subsequent `call_service` for this service fail; the
    /// failed calls are not recorded
    pub fn fail_service(&self, service: &str) {
        lock(&self.failing_services).insert(service.to_string());
    }

    /// Push a state change to every listener subscribed to an entity
    pub async fn push_state(&self, entity_id: &str, old: Option<&str>, new: &str) {
        let subscribers = lock(&self.listeners)
            .get(entity_id)
            .cloned()
            .unwrap_or_default();
        let change = StateChange {
            entity_id: entity_id.to_string(),
            old: old.map(|s| s.to_string()),
            new: Some(new.to_string()),
            when: Local::now(),
        };
        for tx in subscribers {
            let _ = tx.send(change.clone()).await;
        }
    }
}

#[async_trait]
impl Framework for MockFramework {
    async fn call_service(&self, service: &str, payload: Value) -> Result<()> {
        if lock(&self.failing_services).contains(service) {
            return Err(HearthError::service_call(format!(
                "injected failure for {service}"
            )));
        }
        lock(&self.service_calls).push(RecordedServiceCall {
            service: service.to_string(),
            payload,
        });
        Ok(())
    }

    async fn fire_event(&self, event: &str, payload: Value) -> Result<()> {
        lock(&self.events).push(RecordedEvent {
            event: event.to_string(),
            payload,
        });
        Ok(())
    }

    async fn listen_state(&self, entity_id: &str, tx: mpsc::Sender<StateChange>) -> Result<()> {
        lock(&self.listeners)
            .entry(entity_id.to_string())
            .or_default()
            .push(tx);
        Ok(())
    }
}

struct MockTimer {
    when: DateTime<Local>,
    every: Option<Duration>,
    callback: TimerCallback,
}

/// Manually-driven scheduler: registrations are held until the test fires
/// them explicitly, so timer-dependent behavior is deterministic.
#[derive(Default)]
pub struct MockScheduler {
    timers: Mutex<HashMap<TimerHandle, MockTimer>>,
}

impl MockScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of live registrations
    pub fn active(&self) -> usize {
        lock(&self.timers).len()
    }

    /// Registered fire times, soonest first
    pub fn pending(&self) -> Vec<(TimerHandle, DateTime<Local>)> {
        let mut pending: Vec<_> = lock(&self.timers)
            .iter()
            .map(|(handle, timer)| (handle.clone(), timer.when))
            .collect();
        pending.sort_by_key(|(_, when)| *when);
        pending
    }

    /// Fire one timer now. One-shot registrations are consumed; repeating
    /// ones stay registered. Returns false for unknown handles.
    pub async fn fire(&self, handle: &TimerHandle) -> bool {
        // Clone the callback out so it runs without the registry locked;
        // callbacks may re-enter the scheduler (cancel, re-register).
        let fired = {
            let mut timers = lock(&self.timers);
            match timers.get(handle).map(|t| t.every.is_some()) {
                Some(false) => timers.remove(handle).map(|t| t.callback),
                Some(true) => timers.get(handle).map(|t| t.callback.clone()),
                None => None,
            }
        };
        match fired {
            Some(callback) => {
                callback().await;
                true
            }
            None => false,
        }
    }

    /// Fire the soonest pending timer, returning its scheduled time
    pub async fn fire_next(&self) -> Option<DateTime<Local>> {
        let (handle, when) = self.pending().into_iter().next()?;
        self.fire(&handle).await;
        Some(when)
    }

    /// Fire every currently pending timer once, in schedule order
    pub async fn fire_all(&self) {
        for (handle, _) in self.pending() {
            self.fire(&handle).await;
        }
    }
}

impl Scheduler for MockScheduler {
    fn run_at(&self, when: DateTime<Local>, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::new();
        lock(&self.timers).insert(
            handle.clone(),
            MockTimer {
                when,
                every: None,
                callback,
            },
        );
        handle
    }

    fn run_every(
        &self,
        start: DateTime<Local>,
        every: Duration,
        callback: TimerCallback,
    ) -> TimerHandle {
        let handle = TimerHandle::new();
        lock(&self.timers).insert(
            handle.clone(),
            MockTimer {
                when: start,
                every: Some(every),
                callback,
            },
        );
        handle
    }

    fn cancel(&self, handle: &TimerHandle) {
        lock(&self.timers).remove(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_callback(counter: Arc<AtomicU32>) -> TimerCallback {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn test_one_shot_fires_once_and_is_consumed() {
        let scheduler = MockScheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        let handle = scheduler.run_at(Local::now(), counting_callback(counter.clone()));

        assert!(scheduler.fire(&handle).await);
        assert!(!scheduler.fire(&handle).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.active(), 0);
    }

    #[tokio::test]
    async fn test_repeating_timer_stays_registered() {
        let scheduler = MockScheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        let handle = scheduler.run_every(
            Local::now(),
            Duration::from_secs(60),
            counting_callback(counter.clone()),
        );

        scheduler.fire(&handle).await;
        scheduler.fire(&handle).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.active(), 1);

        scheduler.cancel(&handle);
        assert!(!scheduler.fire(&handle).await);
    }

    #[tokio::test]
    async fn test_fail_service_injects_error_for_that_service_only() {
        let framework = MockFramework::new();
        framework.fail_service("notify/ios_aaron");

        let err = framework
            .call_service("notify/ios_aaron", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, HearthError::ServiceCall(_)));

        framework
            .call_service("notify/ios_britt", Value::Null)
            .await
            .unwrap();
        // Only the successful call was recorded
        let calls = framework.service_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].service, "notify/ios_britt");
    }

    #[tokio::test]
    async fn test_push_state_reaches_listeners() {
        let framework = MockFramework::new();
        let (tx, mut rx) = mpsc::channel(4);
        framework
            .listen_state("device_tracker.aaron_phone", tx)
            .await
            .unwrap();

        framework
            .push_state("device_tracker.aaron_phone", Some("home"), "not_home")
            .await;
        let change = rx.recv().await.unwrap();
        assert_eq!(change.new.as_deref(), Some("not_home"));
        assert_eq!(change.old.as_deref(), Some("home"));
    }
}
