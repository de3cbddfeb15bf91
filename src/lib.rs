//! Presence tracking and notification dispatch core for home-automation apps
//!
//! This crate is the shared core consumed by per-appliance automations that
//! run atop an external home-automation framework. The framework owns the
//! event bus, the scheduler primitives and state persistence; this crate
//! owns the logic layered on top of them:
//!
//! - Symbolic notification targets (`person:Aaron`, `presence:home`,
//!   `slack:#general/@aaron`, `not Aaron`) resolved into concrete delivery
//!   channels at send time
//! - A per-person presence state machine with debounced
//!   Home/JustArrived/JustLeft/Away/ExtendedAway transitions
//! - Blackout-window aware scheduling for one-shot and repeating
//!   notifications, each returning an idempotent cancellation handle
//!
//! The framework boundary is expressed as the [`framework::Framework`] and
//! [`framework::Scheduler`] traits; a tokio-backed scheduler ships with the
//! crate, and a recording mock framework is available behind the
//! `test-utils` feature.

// Core modules
pub mod config;
pub mod error;
pub mod framework;
pub mod logging;
pub mod notify;
pub mod presence;

// Test support modules - available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// Re-export main types for convenience
pub use config::{AppConfig, BlackoutWindow, PersonConfig, PresenceConfig};
pub use error::{HearthError, Result};
pub use notify::{CancelHandle, Notification, NotificationDispatcher};
pub use presence::{Person, PresenceRegistry, PresenceState};
