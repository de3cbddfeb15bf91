//! Notification dispatch: scheduling, delivery and cancellation
//!
//! The dispatcher accepts a send request with symbolic targets, finalizes
//! its send time through the blackout adjuster, registers it with the
//! external scheduler and returns an idempotent cancellation handle.
//! Targets are re-resolved on every fire, so presence changes between
//! dispatch and delivery are always reflected.

pub mod blackout;
pub mod target;

pub use target::{ResolvedChannel, TargetResolver};

use crate::config::BlackoutWindow;
use crate::error::{HearthError, Result};
use crate::framework::{Framework, Scheduler, TimerCallback, TimerHandle};
use crate::presence::PresenceRegistry;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One logical message to send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Unique per instance
    pub id: Uuid,
    /// Message body
    pub message: String,
    /// Optional title
    pub title: Option<String>,
    /// Raw symbolic targets, re-resolved at every fire
    pub targets: Vec<String>,
    /// Effective send time (always set once dispatched)
    pub when: Option<DateTime<Local>>,
    /// Repeat interval; `None` for one-shot notifications
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Maximum number of deliveries for a repeating notification
    pub iterations: Option<u32>,
    /// Do-not-disturb window deferring delivery
    pub blackout: Option<BlackoutWindow>,
    /// Free-form payload forwarded to the notify service; carries the
    /// push grouping key under "group"
    pub data: Map<String, Value>,
}

impl Notification {
    /// Grouping key shared by all instances of one logical notification,
    /// derived from title and message for client-side push threading
    pub fn grouping_key(title: Option<&str>, message: &str) -> String {
        let digest = Sha256::digest(format!("{}\n{}", title.unwrap_or_default(), message));
        hex::encode(digest)[..12].to_string()
    }
}

/// Options for a one-shot send
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub title: Option<String>,
    pub when: Option<DateTime<Local>>,
    /// Overrides the dispatcher's default blackout window
    pub blackout: Option<BlackoutWindow>,
    pub data: Option<Map<String, Value>>,
}

/// Options for a repeating send
#[derive(Debug, Clone, Default)]
pub struct RepeatOptions {
    pub title: Option<String>,
    pub when: Option<DateTime<Local>>,
    /// Deliveries stop after exactly this many fires
    pub iterations: Option<u32>,
    /// Overrides the dispatcher's default blackout window
    pub blackout: Option<BlackoutWindow>,
    pub data: Option<Map<String, Value>>,
}

/// Registry entry for a dispatched notification
struct ActiveNotification {
    notification: Notification,
    timer: Option<TimerHandle>,
    /// Deliveries performed so far (repeating notifications only)
    fired: u32,
}

/// What a fire tick decided to do, resolved under the registry lock and
/// executed after releasing it
enum FireAction {
    /// Stale tick, nothing registered
    Skip,
    /// Deliver and keep the series alive
    Deliver(Notification),
    /// Deliver, then tear the series down (one-shot, or final capped fire)
    Finish(Notification, Option<TimerHandle>),
    /// Series drifted into a blackout window: already re-registered for
    /// the window's end, tear down the old timer without delivering
    Defer(Option<TimerHandle>),
}

/// Orchestrates target resolution, blackout adjustment and scheduling
pub struct NotificationDispatcher {
    resolver: TargetResolver,
    framework: Arc<dyn Framework>,
    scheduler: Arc<dyn Scheduler>,
    /// Window applied to notifications that carry none of their own
    default_blackout: Option<BlackoutWindow>,
    active: RwLock<HashMap<Uuid, ActiveNotification>>,
    /// Self-handle captured into timer callbacks and cancel handles
    weak: Weak<Self>,
}

impl NotificationDispatcher {
    pub fn new(
        registry: Arc<PresenceRegistry>,
        framework: Arc<dyn Framework>,
        scheduler: Arc<dyn Scheduler>,
        default_blackout: Option<BlackoutWindow>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            resolver: TargetResolver::new(registry),
            framework,
            scheduler,
            default_blackout,
            active: RwLock::new(HashMap::new()),
            weak: weak.clone(),
        })
    }

    /// Resolver view over the same people directory, for callers that only
    /// need target expansion
    pub fn resolver(&self) -> &TargetResolver {
        &self.resolver
    }

    /// Number of live (scheduled, not yet completed/cancelled) notifications
    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Dispatch a one-shot notification.
    ///
    /// Fires at `opts.when` (or immediately), deferred out of the blackout
    /// window if one applies. Returns an idempotent cancellation handle.
    pub async fn send(
        &self,
        message: &str,
        targets: &[&str],
        opts: SendOptions,
    ) -> Result<CancelHandle> {
        self.validate(message, targets)?;
        let notification = self.build(message, targets, opts.title, opts.when, None, None, opts.blackout, opts.data);
        self.dispatch(notification).await
    }

    /// Dispatch a repeating notification firing every `every`.
    ///
    /// With `iterations` set, delivers exactly that many times and then
    /// removes itself from the registry.
    pub async fn repeat(
        &self,
        message: &str,
        every: Duration,
        targets: &[&str],
        opts: RepeatOptions,
    ) -> Result<CancelHandle> {
        self.validate(message, targets)?;
        if every.is_zero() {
            return Err(HearthError::invalid_input("repeat interval must be non-zero"));
        }
        if opts.iterations == Some(0) {
            return Err(HearthError::invalid_input("iteration cap must be non-zero"));
        }
        let notification = self.build(
            message,
            targets,
            opts.title,
            opts.when,
            Some(every),
            opts.iterations,
            opts.blackout,
            opts.data,
        );
        self.dispatch(notification).await
    }

    fn validate(&self, message: &str, targets: &[&str]) -> Result<()> {
        if message.trim().is_empty() {
            return Err(HearthError::invalid_input("notification message is empty"));
        }
        if targets.is_empty() {
            return Err(HearthError::invalid_input("notification has no targets"));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        message: &str,
        targets: &[&str],
        title: Option<String>,
        when: Option<DateTime<Local>>,
        interval: Option<Duration>,
        iterations: Option<u32>,
        blackout: Option<BlackoutWindow>,
        data: Option<Map<String, Value>>,
    ) -> Notification {
        let mut data = data.unwrap_or_default();
        data.entry("group".to_string()).or_insert_with(|| {
            Value::String(Notification::grouping_key(title.as_deref(), message))
        });

        Notification {
            id: Uuid::new_v4(),
            message: message.to_string(),
            title,
            targets: targets.iter().map(|t| t.to_string()).collect(),
            when,
            interval,
            iterations,
            blackout: blackout.or(self.default_blackout),
            data,
        }
    }

    async fn dispatch(&self, mut notification: Notification) -> Result<CancelHandle> {
        let id = notification.id;
        let when = blackout::effective_send_time(
            notification.when,
            notification.blackout.as_ref(),
            Local::now(),
        );
        notification.when = Some(when);

        info!(
            "dispatching notification {} ({:?}) to {:?} at {}",
            id, notification.title, notification.targets, when
        );

        let interval = notification.interval;
        self.active.write().await.insert(
            id,
            ActiveNotification {
                notification,
                timer: None,
                fired: 0,
            },
        );

        let timer = match interval {
            Some(every) => self.scheduler.run_every(when, every, self.fire_callback(id)),
            None => self.scheduler.run_at(when, self.fire_callback(id)),
        };

        let mut active = self.active.write().await;
        match active.get_mut(&id) {
            Some(entry) => entry.timer = Some(timer),
            // Already fired and completed between registration steps
            None => self.scheduler.cancel(&timer),
        }
        drop(active);

        Ok(CancelHandle {
            id,
            dispatcher: self.weak.clone(),
        })
    }

    fn fire_callback(&self, id: Uuid) -> TimerCallback {
        let weak = self.weak.clone();
        Arc::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(this) = weak.upgrade() {
                    this.fire(id).await;
                }
            })
        })
    }

    /// One scheduler tick for a dispatched notification
    async fn fire(&self, id: Uuid) {
        let action = self.decide(id).await;

        match action {
            FireAction::Skip => {}
            FireAction::Deliver(notification) => {
                self.deliver(&notification).await;
            }
            FireAction::Finish(notification, timer) => {
                self.deliver(&notification).await;
                // Cancel last: on a task-based scheduler this aborts the
                // timer task the callback is running on.
                if let Some(timer) = timer {
                    self.scheduler.cancel(&timer);
                }
            }
            FireAction::Defer(old_timer) => {
                if let Some(timer) = old_timer {
                    self.scheduler.cancel(&timer);
                }
            }
        }
    }

    /// Inspect and update the registry entry for one tick. The replacement
    /// timer for a blackout deferral is registered in here, before the old
    /// timer is cancelled, so the series is never left unscheduled.
    async fn decide(&self, id: Uuid) -> FireAction {
        let mut active = self.active.write().await;
        let Some(entry) = active.get_mut(&id) else {
            return FireAction::Skip;
        };

        let Some(every) = entry.notification.interval else {
            // One-shot: deliver and drop the entry
            return match active.remove(&id) {
                Some(entry) => FireAction::Finish(entry.notification, None),
                None => FireAction::Skip,
            };
        };

        // Iteration cap is enforced before sending: exactly N deliveries
        if let Some(cap) = entry.notification.iterations {
            if entry.fired >= cap {
                debug!("notification {} past its iteration cap; expiring", id);
                return match active.remove(&id) {
                    Some(entry) => FireAction::Defer(entry.timer),
                    None => FireAction::Skip,
                };
            }
        }

        // Long-lived series can drift into a blackout window that did not
        // apply at dispatch time, so the window is re-checked per fire.
        let now = Local::now();
        if let Some(window) = entry.notification.blackout {
            if window.contains(now.time()) {
                let resume = blackout::effective_send_time(None, Some(&window), now);
                debug!(
                    "notification {} inside blackout window; resuming at {}",
                    id, resume
                );
                entry.notification.when = Some(resume);
                let old_timer = entry.timer.take();
                let replacement = self.scheduler.run_every(resume, every, self.fire_callback(id));
                entry.timer = Some(replacement);
                return FireAction::Defer(old_timer);
            }
        }

        entry.fired += 1;
        let done = entry
            .notification
            .iterations
            .is_some_and(|cap| entry.fired >= cap);
        if done {
            debug!("notification {} reached its iteration cap", id);
            match active.remove(&id) {
                Some(entry) => FireAction::Finish(entry.notification, entry.timer),
                None => FireAction::Skip,
            }
        } else {
            FireAction::Deliver(entry.notification.clone())
        }
    }

    /// Resolve targets fresh and issue one service call per resolved
    /// channel. Per-channel failures are logged and isolated; an
    /// unresolvable target contributes zero calls without failing the rest.
    async fn deliver(&self, notification: &Notification) {
        let mut channels: Vec<ResolvedChannel> = Vec::new();
        for raw in &notification.targets {
            let resolved = self.resolver.resolve(raw).await;
            if resolved.is_empty() {
                warn!(
                    "target '{}' of notification {} resolved to nothing",
                    raw, notification.id
                );
            }
            for channel in resolved {
                if !channels.contains(&channel) {
                    channels.push(channel);
                }
            }
        }

        for channel in &channels {
            let payload = self.payload_for(notification, channel);
            if let Err(e) = self.framework.call_service(&channel.service(), payload).await {
                warn!(
                    "delivery of notification {} via {} failed: {}",
                    notification.id,
                    channel.service(),
                    e
                );
            }
        }
    }

    fn payload_for(&self, notification: &Notification, channel: &ResolvedChannel) -> Value {
        let mut message = notification.message.clone();
        let mut payload = Map::new();

        if let ResolvedChannel::Chat {
            channel: chat_channel,
            mention,
        } = channel
        {
            if let Some(mention) = mention {
                message = format!("{mention}: {message}");
            }
            if let Some(chat_channel) = chat_channel {
                payload.insert("target".to_string(), json!(chat_channel));
            }
        }

        payload.insert("message".to_string(), json!(message));
        if let Some(title) = &notification.title {
            payload.insert("title".to_string(), json!(title));
        }
        payload.insert("data".to_string(), Value::Object(notification.data.clone()));
        Value::Object(payload)
    }
}

/// Idempotent cancellation handle returned from `send`/`repeat`.
///
/// Cancelling deregisters the scheduled action and removes the
/// notification from the registry; cancelling twice, after natural
/// completion, or after the dispatcher is gone, is a safe no-op.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    id: Uuid,
    dispatcher: Weak<NotificationDispatcher>,
}

impl CancelHandle {
    /// Notification id this handle controls
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the notification is still scheduled
    pub async fn is_active(&self) -> bool {
        match self.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.active.read().await.contains_key(&self.id),
            None => false,
        }
    }

    /// Cancel the notification; safe to call any number of times
    pub async fn cancel(&self) {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            return;
        };
        let removed = dispatcher.active.write().await.remove(&self.id);
        if let Some(entry) = removed {
            if let Some(timer) = entry.timer {
                dispatcher.scheduler.cancel(&timer);
            }
            debug!("cancelled notification {}", self.id);
        }
    }
}
