//! External framework boundary
//!
//! The home-automation framework owns the event bus, the scheduler and the
//! service-call transport. This module expresses the slice of it this crate
//! consumes as traits, so presence and notification logic can run against
//! the real framework bridge or the in-crate mock.

pub mod tokio_scheduler;

pub use tokio_scheduler::TokioScheduler;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One entity state change delivered by the event bus
#[derive(Debug, Clone)]
pub struct StateChange {
    /// Entity that changed (e.g. "device_tracker.aaron_phone")
    pub entity_id: String,
    /// Previous state value, if the bus knows it
    pub old: Option<String>,
    /// New state value
    pub new: Option<String>,
    /// When the change was observed
    pub when: DateTime<Local>,
}

/// Callback invoked when a scheduled timer fires
pub type TimerCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Opaque handle for a scheduled timer registration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerHandle(Uuid);

impl TimerHandle {
    /// Mint a fresh handle
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying id, for logging
    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event bus and service-call surface of the external framework
#[async_trait]
pub trait Framework: Send + Sync {
    /// Invoke a domain/service pair with a JSON payload
    /// (e.g. `notify/ios_aaron`, `alarm_control_panel/alarm_arm_away`).
    /// Fire-and-forget: no response value is awaited beyond transport errors.
    async fn call_service(&self, service: &str, payload: Value) -> Result<()>;

    /// Publish a named event with a key/value payload onto the shared bus
    async fn fire_event(&self, event: &str, payload: Value) -> Result<()>;

    /// Subscribe to state changes for an entity; changes are delivered on
    /// the provided channel for the life of the subscription
    async fn listen_state(&self, entity_id: &str, tx: mpsc::Sender<StateChange>) -> Result<()>;
}

/// Scheduling primitives of the external framework
pub trait Scheduler: Send + Sync {
    /// Run a callback once at a wall-clock time
    fn run_at(&self, when: DateTime<Local>, callback: TimerCallback) -> TimerHandle;

    /// Run a callback at `start` and every `every` thereafter
    fn run_every(
        &self,
        start: DateTime<Local>,
        every: Duration,
        callback: TimerCallback,
    ) -> TimerHandle;

    /// Cancel a scheduled timer; unknown/expired handles are a no-op
    fn cancel(&self, handle: &TimerHandle);
}
