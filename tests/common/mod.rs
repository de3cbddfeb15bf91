//! Shared fixtures for integration tests
#![allow(dead_code)]

use hearth_automation::config::{PersonConfig, PresenceConfig};
use hearth_automation::mock::{MockFramework, MockScheduler};
use hearth_automation::notify::NotificationDispatcher;
use hearth_automation::presence::{PresenceRegistry, PresenceTracker};
use std::sync::Arc;

/// Presence machine, dispatcher and mocks wired together over one directory
pub struct TestHarness {
    pub registry: Arc<PresenceRegistry>,
    pub framework: Arc<MockFramework>,
    pub scheduler: Arc<MockScheduler>,
    pub tracker: Arc<PresenceTracker>,
    pub dispatcher: Arc<NotificationDispatcher>,
}

pub fn person(name: &str, channels: &[&str]) -> PersonConfig {
    let key = name.to_lowercase();
    PersonConfig {
        name: key.clone(),
        first_name: Some(name.to_string()),
        channels: channels.iter().map(|c| c.to_string()).collect(),
        push_device_id: None,
        presence_sensor: None,
        trackers: vec![format!("device_tracker.{key}_phone")],
    }
}

pub fn harness(people: &[PersonConfig]) -> TestHarness {
    let registry = Arc::new(PresenceRegistry::new(people));
    let framework = MockFramework::new();
    let scheduler = MockScheduler::new();
    let tracker = PresenceTracker::new(
        registry.clone(),
        framework.clone(),
        scheduler.clone(),
        PresenceConfig::default(),
    );
    let dispatcher = NotificationDispatcher::new(
        registry.clone(),
        framework.clone(),
        scheduler.clone(),
        None,
    );
    TestHarness {
        registry,
        framework,
        scheduler,
        tracker,
        dispatcher,
    }
}
