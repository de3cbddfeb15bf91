//! Presence tracking: people directory, states, cohorts and queries
//!
//! The [`PresenceRegistry`] is the process-wide directory of tracked people
//! and their current presence states. It is an explicit context object
//! constructed once at startup and shared (via `Arc`) with the target
//! resolver, the state machine and the notification dispatcher.

pub mod tracker;

pub use tracker::PresenceTracker;

use crate::config::PersonConfig;
use crate::framework::TimerHandle;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;

/// Coarse per-person presence state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Home,
    JustArrived,
    JustLeft,
    Away,
    ExtendedAway,
}

impl PresenceState {
    /// All states, in transition order
    pub const ALL: [PresenceState; 5] = [
        PresenceState::Home,
        PresenceState::JustArrived,
        PresenceState::JustLeft,
        PresenceState::Away,
        PresenceState::ExtendedAway,
    ];

    /// Whether this state belongs to the home lineage (counts as present)
    pub fn is_home_side(&self) -> bool {
        matches!(self, PresenceState::Home | PresenceState::JustArrived)
    }

    /// States sharing this state's equivalence class, used for the `first`
    /// flag on presence-change events
    pub fn lineage(&self) -> &'static [PresenceState] {
        if self.is_home_side() {
            &[PresenceState::Home, PresenceState::JustArrived]
        } else {
            &[
                PresenceState::Away,
                PresenceState::JustLeft,
                PresenceState::ExtendedAway,
            ]
        }
    }
}

impl std::fmt::Display for PresenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PresenceState::Home => "home",
            PresenceState::JustArrived => "just_arrived",
            PresenceState::JustLeft => "just_left",
            PresenceState::Away => "away",
            PresenceState::ExtendedAway => "extended_away",
        };
        write!(f, "{name}")
    }
}

/// Named presence cohort, resolvable from `presence:<cohort>` targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cohort {
    Home,
    Away,
    JustArrived,
    JustLeft,
    ExtendedAway,
    Everyone,
}

impl Cohort {
    /// Explicit cohort-name → state-set dispatch table
    pub fn states(&self) -> &'static [PresenceState] {
        match self {
            Cohort::Home => &[PresenceState::Home, PresenceState::JustArrived],
            Cohort::Away => &[
                PresenceState::Away,
                PresenceState::JustLeft,
                PresenceState::ExtendedAway,
            ],
            Cohort::JustArrived => &[PresenceState::JustArrived],
            Cohort::JustLeft => &[PresenceState::JustLeft],
            Cohort::ExtendedAway => &[PresenceState::ExtendedAway],
            Cohort::Everyone => &PresenceState::ALL,
        }
    }
}

impl FromStr for Cohort {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "home" => Ok(Cohort::Home),
            "away" => Ok(Cohort::Away),
            "just_arrived" => Ok(Cohort::JustArrived),
            "just_left" => Ok(Cohort::JustLeft),
            "extended_away" => Ok(Cohort::ExtendedAway),
            "everyone" => Ok(Cohort::Everyone),
            _ => Err(()),
        }
    }
}

/// One configured person in the directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    /// Unique directory key
    pub name: String,
    /// Display / lookup name
    pub first_name: String,
    /// Concrete notification channel identifiers
    pub channels: Vec<String>,
    /// Stable push-device identifier, if any
    pub push_device_id: Option<String>,
    /// Presence status sensor entity, if any
    pub presence_sensor: Option<String>,
    /// Raw device-tracker entities feeding the state machine
    pub trackers: Vec<String>,
}

impl Person {
    fn from_config(config: &PersonConfig) -> Self {
        Self {
            name: config.name.clone(),
            first_name: config.display_name().to_string(),
            channels: config.channels.clone(),
            push_device_id: config.push_device_id.clone(),
            presence_sensor: config.presence_sensor.clone(),
            trackers: config.trackers.clone(),
        }
    }
}

/// Named per-person debounce timer handles.
///
/// Explicit fields rather than ad hoc keyed entries so that cancellation on
/// a fresh raw signal can never miss a pending timer.
#[derive(Debug, Default, Clone)]
pub(crate) struct PersonTimers {
    pub just_arrived: Option<TimerHandle>,
    pub just_left: Option<TimerHandle>,
    pub extended_away: Option<TimerHandle>,
}

impl PersonTimers {
    /// Take all pending handles, leaving the struct empty
    pub fn drain(&mut self) -> Vec<TimerHandle> {
        [
            self.just_arrived.take(),
            self.just_left.take(),
            self.extended_away.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[derive(Debug)]
pub(crate) struct PersonEntry {
    pub person: Person,
    pub state: PresenceState,
    /// Last accepted raw tracker value ("home" / "not_home")
    pub raw: Option<String>,
    pub timers: PersonTimers,
}

/// Process-wide directory of tracked people and their presence states
pub struct PresenceRegistry {
    pub(crate) entries: RwLock<HashMap<String, PersonEntry>>,
}

impl PresenceRegistry {
    /// Build the directory from configuration; everyone starts Away until
    /// seeded from live tracker readings
    pub fn new(people: &[PersonConfig]) -> Self {
        let entries = people
            .iter()
            .map(|config| {
                let person = Person::from_config(config);
                (
                    person.name.clone(),
                    PersonEntry {
                        person,
                        state: PresenceState::Away,
                        raw: None,
                        timers: PersonTimers::default(),
                    },
                )
            })
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Current state for a person, by directory key
    pub async fn state(&self, name: &str) -> Option<PresenceState> {
        self.entries.read().await.get(name).map(|e| e.state)
    }

    /// All configured people
    pub async fn people(&self) -> Vec<Person> {
        self.entries
            .read()
            .await
            .values()
            .map(|e| e.person.clone())
            .collect()
    }

    /// Look up a person by directory key
    pub async fn person(&self, name: &str) -> Option<Person> {
        self.entries.read().await.get(name).map(|e| e.person.clone())
    }

    /// Look up a person by display name (case-sensitive)
    pub async fn person_by_first_name(&self, first_name: &str) -> Option<Person> {
        self.entries
            .read()
            .await
            .values()
            .find(|e| e.person.first_name == first_name)
            .map(|e| e.person.clone())
    }

    /// Everyone except the named person (matched on display name)
    pub async fn others(&self, first_name: &str) -> Vec<Person> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.person.first_name != first_name)
            .map(|e| e.person.clone())
            .collect()
    }

    /// People currently in any of the given states
    pub async fn whose(&self, states: &[PresenceState]) -> Vec<Person> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| states.contains(&e.state))
            .map(|e| e.person.clone())
            .collect()
    }

    /// Whether at least one person is in any of the given states
    pub async fn anyone(&self, states: &[PresenceState]) -> bool {
        self.entries
            .read()
            .await
            .values()
            .any(|e| states.contains(&e.state))
    }

    /// Whether every tracked person is in one of the given states
    pub async fn everyone(&self, states: &[PresenceState]) -> bool {
        let entries = self.entries.read().await;
        !entries.is_empty() && entries.values().all(|e| states.contains(&e.state))
    }

    /// Whether nobody is in any of the given states
    pub async fn noone(&self, states: &[PresenceState]) -> bool {
        !self.anyone(states).await
    }

    /// Whether exactly one person is in any of the given states
    pub async fn only_one(&self, states: &[PresenceState]) -> bool {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| states.contains(&e.state))
            .count()
            == 1
    }

    /// People currently on the home side (Home or JustArrived)
    pub async fn whos_home(&self) -> Vec<Person> {
        self.whose(Cohort::Home.states()).await
    }

    /// People currently on the away side (Away, JustLeft or ExtendedAway)
    pub async fn whos_away(&self) -> Vec<Person> {
        self.whose(Cohort::Away.states()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn person(name: &str, channels: &[&str]) -> PersonConfig {
        PersonConfig {
            name: name.to_lowercase(),
            first_name: Some(name.to_string()),
            channels: channels.iter().map(|c| c.to_string()).collect(),
            push_device_id: None,
            presence_sensor: None,
            trackers: vec![format!("device_tracker.{}_phone", name.to_lowercase())],
        }
    }

    async fn set_state(registry: &PresenceRegistry, name: &str, state: PresenceState) {
        registry.entries.write().await.get_mut(name).unwrap().state = state;
    }

    #[tokio::test]
    async fn test_whose_spans_cohort_states() {
        let registry = PresenceRegistry::new(&[
            person("Aaron", &["ios_aaron"]),
            person("Britt", &["ios_britt"]),
            person("Carol", &["ios_carol"]),
        ]);
        set_state(&registry, "aaron", PresenceState::Home).await;
        set_state(&registry, "britt", PresenceState::JustArrived).await;
        set_state(&registry, "carol", PresenceState::ExtendedAway).await;

        let mut home: Vec<String> = registry
            .whos_home()
            .await
            .into_iter()
            .map(|p| p.first_name)
            .collect();
        home.sort();
        assert_eq!(home, vec!["Aaron", "Britt"]);

        let away: Vec<String> = registry
            .whos_away()
            .await
            .into_iter()
            .map(|p| p.first_name)
            .collect();
        assert_eq!(away, vec!["Carol"]);
    }

    #[tokio::test]
    async fn test_boolean_predicates() {
        let registry =
            PresenceRegistry::new(&[person("Aaron", &[]), person("Britt", &[])]);
        set_state(&registry, "aaron", PresenceState::Home).await;
        set_state(&registry, "britt", PresenceState::Away).await;

        assert!(registry.anyone(&[PresenceState::Home]).await);
        assert!(registry.only_one(&[PresenceState::Home]).await);
        assert!(registry.noone(&[PresenceState::ExtendedAway]).await);
        assert!(!registry.everyone(&[PresenceState::Home]).await);
        assert!(
            registry
                .everyone(&[PresenceState::Home, PresenceState::Away])
                .await
        );
    }

    #[tokio::test]
    async fn test_lookup_by_first_name_is_case_sensitive() {
        let registry = PresenceRegistry::new(&[person("Aaron", &["ios_aaron"])]);
        assert!(registry.person_by_first_name("Aaron").await.is_some());
        assert!(registry.person_by_first_name("aaron").await.is_none());
    }

    #[test]
    fn test_cohort_parsing() {
        assert_eq!("home".parse::<Cohort>(), Ok(Cohort::Home));
        assert_eq!("extended_away".parse::<Cohort>(), Ok(Cohort::ExtendedAway));
        assert!("sleeping".parse::<Cohort>().is_err());
    }

    #[test]
    fn test_lineages() {
        assert!(PresenceState::JustArrived.is_home_side());
        assert!(!PresenceState::JustLeft.is_home_side());
        assert_eq!(
            PresenceState::ExtendedAway.lineage(),
            PresenceState::Away.lineage()
        );
    }
}
