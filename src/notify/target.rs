//! Symbolic notification target resolution
//!
//! A raw target string ("person:Aaron", "presence:home", "slack:#general",
//! "not Aaron", "everyone", or a bare channel identifier) is expanded into
//! concrete delivery channels against the live people directory. Resolution
//! is re-run at every delivery, never cached: presence cohorts and channel
//! lists are read fresh each time.

use crate::presence::{Cohort, Person, PresenceRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

const PERSON_PREFIX: &str = "person:";
const PRESENCE_PREFIX: &str = "presence:";
const SLACK_PREFIX: &str = "slack:";
const NOT_PREFIX: &str = "not ";
const EVERYONE: &str = "everyone";

/// A concrete delivery descriptor produced from a symbolic target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ResolvedChannel {
    /// Push/device channel delivered via `notify/<channel>`
    Service { channel: String },
    /// Chat delivery with an optional channel and an optional mention
    /// prefix prepended to the message body
    Chat {
        channel: Option<String>,
        mention: Option<String>,
    },
}

impl ResolvedChannel {
    /// The framework notify service this channel delivers through
    pub fn service(&self) -> String {
        match self {
            ResolvedChannel::Service { channel } => format!("notify/{channel}"),
            ResolvedChannel::Chat { .. } => "notify/slack".to_string(),
        }
    }
}

/// Resolves symbolic targets against the live people directory
pub struct TargetResolver {
    registry: Arc<PresenceRegistry>,
}

impl TargetResolver {
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self { registry }
    }

    /// Expand one raw target into zero or more concrete channels.
    ///
    /// Unknown names resolve to nothing (logged, non-fatal). Nested
    /// symbolic person/presence references inside a person's channel list
    /// are refused with a logged error rather than recursed into.
    pub async fn resolve(&self, raw: &str) -> Vec<ResolvedChannel> {
        let raw = raw.trim();
        let mut out = Vec::new();

        if let Some(name) = raw.strip_prefix(PERSON_PREFIX) {
            match self.registry.person_by_first_name(name).await {
                Some(person) => expand_person(&person, &mut out),
                None => warn!("cannot resolve '{}': unknown person '{}'", raw, name),
            }
        } else if let Some(name) = raw.strip_prefix(NOT_PREFIX) {
            if self.registry.person_by_first_name(name).await.is_none() {
                warn!("'{}' excludes nobody: unknown person '{}'", raw, name);
            }
            for person in self.registry.others(name).await {
                expand_person(&person, &mut out);
            }
        } else if let Some(cohort_name) = raw.strip_prefix(PRESENCE_PREFIX) {
            match cohort_name.parse::<Cohort>() {
                Ok(cohort) => {
                    for person in self.registry.whose(cohort.states()).await {
                        expand_person(&person, &mut out);
                    }
                }
                Err(()) => {
                    warn!("cannot resolve '{}': unknown cohort '{}'", raw, cohort_name)
                }
            }
        } else if raw == EVERYONE {
            for person in self.registry.people().await {
                expand_person(&person, &mut out);
            }
        } else if let Some(spec) = raw.strip_prefix(SLACK_PREFIX) {
            push_unique(&mut out, parse_slack(spec));
        } else {
            // Bare channel identifier
            push_unique(
                &mut out,
                ResolvedChannel::Service {
                    channel: raw.to_string(),
                },
            );
        }

        out
    }
}

/// Expand one person's configured channel list into concrete descriptors.
///
/// Channel lists hold concrete identifiers ("ios_aaron") or `slack:`
/// descriptors only; a nested symbolic reference would otherwise expand
/// without bound, so it is refused here.
fn expand_person(person: &Person, out: &mut Vec<ResolvedChannel>) {
    for channel in &person.channels {
        let channel = channel.trim();
        if channel.starts_with(PERSON_PREFIX)
            || channel.starts_with(PRESENCE_PREFIX)
            || channel.starts_with(NOT_PREFIX)
            || channel == EVERYONE
        {
            error!(
                "refusing nested symbolic reference '{}' in {}'s channel list",
                channel, person.name
            );
            continue;
        }
        if let Some(spec) = channel.strip_prefix(SLACK_PREFIX) {
            push_unique(out, parse_slack(spec));
        } else {
            push_unique(
                out,
                ResolvedChannel::Service {
                    channel: channel.to_string(),
                },
            );
        }
    }
}

/// Parse a `slack:` suffix into a chat descriptor.
///
/// A `#channel` and an `@mention` may appear alone or combined as
/// `channel/mention`; which is which is decided by the leading `@`.
fn parse_slack(spec: &str) -> ResolvedChannel {
    let mut channel = None;
    let mut mention = None;

    for part in spec.splitn(2, '/') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if part.starts_with('@') {
            mention = Some(part.to_string());
        } else {
            channel = Some(part.to_string());
        }
    }

    ResolvedChannel::Chat { channel, mention }
}

fn push_unique(out: &mut Vec<ResolvedChannel>, channel: ResolvedChannel) {
    if !out.contains(&channel) {
        out.push(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersonConfig;
    use crate::presence::PresenceState;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn directory() -> Arc<PresenceRegistry> {
        Arc::new(PresenceRegistry::new(&[
            PersonConfig {
                name: "aaron".into(),
                first_name: Some("Aaron".into()),
                channels: vec!["ios_aaron".into()],
                push_device_id: None,
                presence_sensor: None,
                trackers: vec![],
            },
            PersonConfig {
                name: "britt".into(),
                first_name: Some("Britt".into()),
                channels: vec!["ios_britt".into(), "slack:@britt".into()],
                push_device_id: None,
                presence_sensor: None,
                trackers: vec![],
            },
        ]))
    }

    fn service(channel: &str) -> ResolvedChannel {
        ResolvedChannel::Service {
            channel: channel.to_string(),
        }
    }

    #[tokio::test]
    async fn test_person_target() {
        let resolver = TargetResolver::new(directory());
        assert_eq!(
            resolver.resolve("person:Aaron").await,
            vec![service("ios_aaron")]
        );
    }

    #[tokio::test]
    async fn test_unknown_person_resolves_empty() {
        let resolver = TargetResolver::new(directory());
        assert!(resolver.resolve("person:Zelda").await.is_empty());
    }

    #[tokio::test]
    async fn test_not_target_excludes_exactly_one() {
        let resolver = TargetResolver::new(directory());
        let channels = resolver.resolve("not Aaron").await;
        assert_eq!(
            channels,
            vec![
                service("ios_britt"),
                ResolvedChannel::Chat {
                    channel: None,
                    mention: Some("@britt".into())
                }
            ]
        );
    }

    #[tokio::test]
    async fn test_presence_cohort_target() {
        let registry = directory();
        registry.entries.write().await.get_mut("aaron").unwrap().state =
            PresenceState::JustArrived;
        let resolver = TargetResolver::new(registry);

        // Only Aaron is on the home side
        assert_eq!(
            resolver.resolve("presence:home").await,
            vec![service("ios_aaron")]
        );
    }

    #[tokio::test]
    async fn test_unknown_cohort_resolves_empty() {
        let resolver = TargetResolver::new(directory());
        assert!(resolver.resolve("presence:sleeping").await.is_empty());
    }

    #[tokio::test]
    async fn test_everyone_unions_all_channels() {
        let resolver = TargetResolver::new(directory());
        let channels = resolver.resolve("everyone").await;
        assert_eq!(channels.len(), 3);
        assert!(channels.contains(&service("ios_aaron")));
        assert!(channels.contains(&service("ios_britt")));
    }

    #[tokio::test]
    async fn test_literal_channel_fallthrough() {
        let resolver = TargetResolver::new(directory());
        assert_eq!(
            resolver.resolve("media_player.kitchen").await,
            vec![service("media_player.kitchen")]
        );
    }

    #[tokio::test]
    async fn test_nested_person_reference_refused() {
        let registry = Arc::new(PresenceRegistry::new(&[PersonConfig {
            name: "loop".into(),
            first_name: Some("Loop".into()),
            // Config validation normally rejects this; the resolver still
            // guards against it.
            channels: vec!["person:Loop".into(), "ios_loop".into()],
            push_device_id: None,
            presence_sensor: None,
            trackers: vec![],
        }]));
        let resolver = TargetResolver::new(registry);
        assert_eq!(
            resolver.resolve("person:Loop").await,
            vec![service("ios_loop")]
        );
    }

    #[rstest]
    #[case("#general", Some("#general"), None)]
    #[case("@aaron", None, Some("@aaron"))]
    #[case("#general/@aaron", Some("#general"), Some("@aaron"))]
    #[case("@aaron/#general", Some("#general"), Some("@aaron"))]
    fn test_parse_slack_variants(
        #[case] spec: &str,
        #[case] channel: Option<&str>,
        #[case] mention: Option<&str>,
    ) {
        assert_eq!(
            parse_slack(spec),
            ResolvedChannel::Chat {
                channel: channel.map(|s| s.to_string()),
                mention: mention.map(|s| s.to_string()),
            }
        );
    }

    #[test]
    fn test_service_names() {
        assert_eq!(service("ios_aaron").service(), "notify/ios_aaron");
        assert_eq!(
            ResolvedChannel::Chat {
                channel: Some("#general".into()),
                mention: None
            }
            .service(),
            "notify/slack"
        );
    }
}
