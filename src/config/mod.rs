//! Configuration for people, presence debouncing and blackout windows
//!
//! Configuration is declarative TOML loaded once at startup and validated
//! fail-fast before any registry or dispatcher is constructed.

use crate::error::{HearthError, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Tracked people and their notification channels
    #[serde(default)]
    pub people: Vec<PersonConfig>,

    /// Presence state machine tuning
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Default do-not-disturb window applied to notifications that do not
    /// carry their own
    #[serde(default)]
    pub blackout: Option<BlackoutWindow>,
}

/// One configured person
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonConfig {
    /// Unique key for the directory (e.g. "aaron")
    pub name: String,

    /// Display / lookup name (e.g. "Aaron"); defaults to `name`
    #[serde(default)]
    pub first_name: Option<String>,

    /// Notification channel identifiers; may include concrete channels
    /// ("ios_aaron") or `slack:` descriptors, but never nested symbolic
    /// person/presence references
    #[serde(default)]
    pub channels: Vec<String>,

    /// Stable push-device identifier, if the person has one
    #[serde(default)]
    pub push_device_id: Option<String>,

    /// Entity id of the sensor rendering this person's presence status
    #[serde(default)]
    pub presence_sensor: Option<String>,

    /// Raw device-tracker entity ids feeding the presence state machine
    #[serde(default)]
    pub trackers: Vec<String>,
}

impl PersonConfig {
    /// Effective display name (explicit first name, else the key)
    pub fn display_name(&self) -> &str {
        self.first_name.as_deref().unwrap_or(&self.name)
    }
}

/// Presence state machine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Debounce before JustArrived/JustLeft promote to Home/Away
    #[serde(with = "humantime_serde", default = "default_debounce")]
    pub debounce: Duration,

    /// Dwell time before Away promotes to ExtendedAway
    #[serde(with = "humantime_serde", default = "default_extended_away")]
    pub extended_away: Duration,
}

fn default_debounce() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_extended_away() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
            extended_away: default_extended_away(),
        }
    }
}

/// A do-not-disturb window expressed as time-of-day bounds.
///
/// Windows may wrap midnight (`end < start`), e.g. 22:00-08:00.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlackoutWindow {
    /// Window start time-of-day (inclusive)
    pub start: NaiveTime,
    /// Window end time-of-day (exclusive)
    pub end: NaiveTime,
}

impl BlackoutWindow {
    /// Construct a window; `end < start` denotes a midnight-wrapping window
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Whether a time-of-day falls inside the window
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t < self.end
        } else {
            // Wraps midnight: inside if after start or before end
            t >= self.start || t < self.end
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(raw)
            .map_err(|e| HearthError::config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, failing fast on schema problems
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut display_names = HashSet::new();

        for person in &self.people {
            if person.name.trim().is_empty() {
                return Err(HearthError::config("person with empty name"));
            }
            if !names.insert(person.name.as_str()) {
                return Err(HearthError::config(format!(
                    "duplicate person name: {}",
                    person.name
                )));
            }
            if !display_names.insert(person.display_name()) {
                return Err(HearthError::config(format!(
                    "duplicate first name: {}",
                    person.display_name()
                )));
            }
            for channel in &person.channels {
                if channel.starts_with("person:")
                    || channel.starts_with("presence:")
                    || channel.starts_with("not ")
                {
                    return Err(HearthError::config(format!(
                        "person '{}' has symbolic channel '{}'; channel lists must be concrete",
                        person.name, channel
                    )));
                }
            }
        }

        if self.presence.debounce.is_zero() {
            return Err(HearthError::config("presence.debounce must be non-zero"));
        }
        if self.presence.extended_away <= self.presence.debounce {
            return Err(HearthError::config(
                "presence.extended_away must exceed presence.debounce",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
        [presence]
        debounce = "5m"
        extended_away = "24h"

        [blackout]
        start = "22:00:00"
        end = "08:00:00"

        [[people]]
        name = "aaron"
        first_name = "Aaron"
        channels = ["ios_aaron"]
        trackers = ["device_tracker.aaron_phone"]

        [[people]]
        name = "britt"
        first_name = "Britt"
        channels = ["ios_britt", "slack:@britt"]
        trackers = ["device_tracker.britt_phone"]
    "#;

    #[test]
    fn test_parse_sample_config() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.people.len(), 2);
        assert_eq!(config.people[0].display_name(), "Aaron");
        assert_eq!(config.presence.debounce, Duration::from_secs(300));
        assert!(config.blackout.is_some());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let raw = r#"
            [[people]]
            name = "aaron"
            [[people]]
            name = "aaron"
        "#;
        let err = AppConfig::from_toml(raw).unwrap_err();
        assert!(err.to_string().contains("duplicate person name"));
    }

    #[test]
    fn test_symbolic_channel_rejected() {
        let raw = r#"
            [[people]]
            name = "aaron"
            channels = ["person:Britt"]
        "#;
        let err = AppConfig::from_toml(raw).unwrap_err();
        assert!(err.to_string().contains("symbolic channel"));
    }

    #[test]
    fn test_blackout_contains_wrapping_window() {
        let window = BlackoutWindow::new(
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        );
        assert!(window.contains(NaiveTime::from_hms_opt(23, 0, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(3, 30, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(9, 0, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(8, 0, 0).unwrap()));
    }

    #[test]
    fn test_blackout_contains_plain_window() {
        let window = BlackoutWindow::new(
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
        );
        assert!(window.contains(NaiveTime::from_hms_opt(13, 0, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(11, 59, 59).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(14, 0, 0).unwrap()));
    }
}
