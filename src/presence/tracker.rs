//! Presence state machine driven by raw device-tracker signals
//!
//! Raw tracker values are debounced through the transient JustArrived and
//! JustLeft states before promotion to Home/Away, with a long dwell timer
//! promoting Away to ExtendedAway. Every fresh raw signal cancels whatever
//! timers the previous signal left pending, so a stale promotion can never
//! fire after the person has already turned around.

use super::{PresenceRegistry, PresenceState};
use crate::config::PresenceConfig;
use crate::error::Result;
use crate::framework::{Framework, Scheduler, StateChange, TimerCallback};
use chrono::Local;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Event name published on every presence transition
pub const PRESENCE_CHANGED_EVENT: &str = "presence_changed";

/// Raw tracker values accepted as "present"
const RAW_HOME: &str = "home";
/// Canonical raw value stored for any accepted non-home reading
const RAW_NOT_HOME: &str = "not_home";

/// Per-person presence state machine
pub struct PresenceTracker {
    registry: Arc<PresenceRegistry>,
    framework: Arc<dyn Framework>,
    scheduler: Arc<dyn Scheduler>,
    config: PresenceConfig,
    /// Self-handle captured into timer callbacks; a fire after the tracker
    /// has been dropped is a no-op.
    weak: Weak<Self>,
}

impl PresenceTracker {
    pub fn new(
        registry: Arc<PresenceRegistry>,
        framework: Arc<dyn Framework>,
        scheduler: Arc<dyn Scheduler>,
        config: PresenceConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            registry,
            framework,
            scheduler,
            config,
            weak: weak.clone(),
        })
    }

    /// Seed each person's state from current tracker readings by majority
    /// vote: Home if most of their trackers read "home", else Away.
    ///
    /// Called once at boot; fires no events and schedules no timers.
    /// Presence is not persisted across restarts, so this staleness is
    /// accepted rather than treated as an error.
    pub async fn seed(&self, readings: &HashMap<String, String>) {
        let mut entries = self.registry.entries.write().await;
        for entry in entries.values_mut() {
            let votes: Vec<bool> = entry
                .person
                .trackers
                .iter()
                .filter_map(|tracker| readings.get(tracker))
                .filter_map(|raw| normalize_raw(raw))
                .collect();
            let home_votes = votes.iter().filter(|home| **home).count();
            let is_home = !votes.is_empty() && home_votes * 2 > votes.len();

            entry.state = if is_home {
                PresenceState::Home
            } else {
                PresenceState::Away
            };
            entry.raw = Some(if is_home { RAW_HOME } else { RAW_NOT_HOME }.to_string());
            debug!(
                "seeded {} as {} ({}/{} trackers home)",
                entry.person.name,
                entry.state,
                home_votes,
                votes.len()
            );
        }
    }

    /// Subscribe to every person's raw trackers and pump their state
    /// changes into the state machine.
    pub async fn watch(&self) -> Result<()> {
        let people = self.registry.people().await;
        for person in people {
            let (tx, mut rx) = mpsc::channel::<StateChange>(16);
            for tracker in &person.trackers {
                self.framework.listen_state(tracker, tx.clone()).await?;
            }

            let weak = self.weak.clone();
            let name = person.name.clone();
            tokio::spawn(async move {
                while let Some(change) = rx.recv().await {
                    let Some(this) = weak.upgrade() else { break };
                    let raw = change.new.as_deref().unwrap_or_default();
                    this.on_tracker_signal(&name, raw).await;
                }
            });
        }
        Ok(())
    }

    /// Feed one raw tracker value for a person into the state machine.
    ///
    /// Malformed or unknown values are logged and ignored; a value equal to
    /// the currently tracked raw state is a no-op.
    pub async fn on_tracker_signal(&self, name: &str, raw: &str) {
        let Some(is_home) = normalize_raw(raw) else {
            warn!("ignoring malformed tracker state '{}' for {}", raw, name);
            return;
        };
        let canonical = if is_home { RAW_HOME } else { RAW_NOT_HOME };

        // Apply the transient transition and collect pending timers to
        // cancel, all under one write lock.
        let (stale_timers, event) = {
            let mut entries = self.registry.entries.write().await;
            let Some(entry) = entries.get_mut(name) else {
                warn!("tracker signal for unknown person '{}'", name);
                return;
            };
            if entry.raw.as_deref() == Some(canonical) {
                return;
            }

            let stale_timers = entry.timers.drain();
            let old = entry.state;
            let new = if is_home {
                PresenceState::JustArrived
            } else {
                PresenceState::JustLeft
            };
            entry.raw = Some(canonical.to_string());
            entry.state = new;

            let first = count_in_lineage(&entries, new) == 1;
            (stale_timers, (old, new, first))
        };

        for handle in stale_timers {
            self.scheduler.cancel(&handle);
        }

        let (old, new, first) = event;
        self.fire_presence_event(name, old, new, first).await;

        // Fresh debounce chain for the new raw state
        let now = Local::now();
        if is_home {
            let handle = self.scheduler.run_at(
                now + as_chrono(self.config.debounce),
                self.promotion_callback(name, Promotion::JustArrivedToHome),
            );
            self.store_timer(name, |timers| timers.just_arrived = Some(handle))
                .await;
        } else {
            let short = self.scheduler.run_at(
                now + as_chrono(self.config.debounce),
                self.promotion_callback(name, Promotion::JustLeftToAway),
            );
            let long = self.scheduler.run_at(
                now + as_chrono(self.config.extended_away),
                self.promotion_callback(name, Promotion::AwayToExtendedAway),
            );
            self.store_timer(name, |timers| {
                timers.just_left = Some(short);
                timers.extended_away = Some(long);
            })
            .await;
        }
    }

    async fn store_timer<F>(&self, name: &str, store: F)
    where
        F: FnOnce(&mut super::PersonTimers),
    {
        let mut entries = self.registry.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            store(&mut entry.timers);
        }
    }

    fn promotion_callback(&self, name: &str, promotion: Promotion) -> TimerCallback {
        let weak = self.weak.clone();
        let name = name.to_string();
        Arc::new(move || {
            let weak = weak.clone();
            let name = name.clone();
            Box::pin(async move {
                if let Some(this) = weak.upgrade() {
                    this.promote(&name, promotion).await;
                }
            })
        })
    }

    /// Promote a transient state to its stable counterpart, guarded against
    /// stale fires: the promotion only applies if the person is still in
    /// the state the timer was armed for.
    async fn promote(&self, name: &str, promotion: Promotion) {
        let event = {
            let mut entries = self.registry.entries.write().await;
            let Some(entry) = entries.get_mut(name) else {
                return;
            };

            let new = match promotion {
                Promotion::JustArrivedToHome => {
                    if entry.state != PresenceState::JustArrived {
                        return;
                    }
                    entry.timers.just_arrived = None;
                    PresenceState::Home
                }
                Promotion::JustLeftToAway => {
                    if entry.state != PresenceState::JustLeft {
                        return;
                    }
                    entry.timers.just_left = None;
                    PresenceState::Away
                }
                Promotion::AwayToExtendedAway => {
                    // Applies from anywhere in the away lineage; a return
                    // home since arming means the timer is stale.
                    if entry.state.is_home_side()
                        || entry.state == PresenceState::ExtendedAway
                    {
                        return;
                    }
                    entry.timers.extended_away = None;
                    PresenceState::ExtendedAway
                }
            };

            let old = entry.state;
            entry.state = new;
            let first = count_in_lineage(&entries, new) == 1;
            (old, new, first)
        };

        let (old, new, first) = event;
        self.fire_presence_event(name, old, new, first).await;
    }

    async fn fire_presence_event(
        &self,
        name: &str,
        old: PresenceState,
        new: PresenceState,
        first: bool,
    ) {
        info!("{}: {} -> {} (first: {})", name, old, new, first);
        let payload = json!({
            "person": name,
            "old": old,
            "new": new,
            "first": first,
        });
        if let Err(e) = self
            .framework
            .fire_event(PRESENCE_CHANGED_EVENT, payload)
            .await
        {
            warn!("failed to publish presence change for {}: {}", name, e);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Promotion {
    JustArrivedToHome,
    JustLeftToAway,
    AwayToExtendedAway,
}

fn as_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Normalize a raw tracker value: `Some(true)` for home, `Some(false)` for
/// a recognized away value, `None` for malformed/unknown values.
fn normalize_raw(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "home" => Some(true),
        "not_home" | "away" => Some(false),
        _ => None,
    }
}

fn count_in_lineage(
    entries: &HashMap<String, super::PersonEntry>,
    state: PresenceState,
) -> usize {
    let lineage = state.lineage();
    entries
        .values()
        .filter(|e| lineage.contains(&e.state))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_raw() {
        assert_eq!(normalize_raw("home"), Some(true));
        assert_eq!(normalize_raw("HOME "), Some(true));
        assert_eq!(normalize_raw("not_home"), Some(false));
        assert_eq!(normalize_raw("away"), Some(false));
        assert_eq!(normalize_raw("unknown"), None);
        assert_eq!(normalize_raw(""), None);
    }
}
