// supervisor.rs — SubscriptionSupervisor: the notifier's single event loop.
//
// Owns the upstream subscription lifecycle and routes every event:
//
//   startup            → subscribe all topics on the current session
//   tick               → recreate all subscriptions if any is about to
//                        expire, else subscribe only the missing topics
//   session_welcome    → new session: old subscriptions are gone, recreate
//   session_lost       → forget subscriptions, wait for a new session
//   subscription_failed→ forget that topic; the next tick retries it
//   state_changed      → BroadcastDispatcher
//   inbound_message    → registration + bot commands
//   chat_activity      → log line + desktop toast
//
// Events are handled one at a time in arrival order, so nothing else ever
// races the dispatcher or the registry.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use gtg_delivery::Urgency;

use crate::commands::{self, InboundOutcome};
use crate::context::NotifierContext;
use crate::dispatcher::BroadcastDispatcher;
use crate::event::{ChatterRole, DomainEvent, SourceEvent, Topic};
use crate::source::{EventSource, SubscribeRequest};

/// An active upstream subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: Topic,
    pub transport_session_id: String,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl Subscription {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        self.created_at + ttl
    }

    /// Whether this subscription expires within `margin` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero());
        now + margin >= self.expires_at()
    }
}

/// Subscription settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub topics: Vec<Topic>,
    /// Lifetime of a subscription before it must be recreated.
    pub ttl: Duration,
    /// How often renewal is checked.
    pub tick: Duration,
    /// Bot account that reads chat (for the chat-message topic).
    pub bot_user_id: Option<String>,
}

impl SupervisorConfig {
    /// Stream state topics, plus chat when a bot account is configured.
    pub fn for_bot(bot_user_id: Option<String>) -> Self {
        let mut topics = vec![Topic::StreamOnline, Topic::StreamOffline];
        if bot_user_id.is_some() {
            topics.push(Topic::ChatMessage);
        }
        Self {
            topics,
            ttl: Duration::from_secs(3600),
            tick: Duration::from_secs(60),
            bot_user_id,
        }
    }
}

pub struct SubscriptionSupervisor<S: EventSource> {
    source: S,
    ctx: NotifierContext,
    dispatcher: BroadcastDispatcher,
    config: SupervisorConfig,
    session_id: Option<String>,
    subscriptions: Vec<Subscription>,
}

impl<S: EventSource> SubscriptionSupervisor<S> {
    pub fn new(
        source: S,
        ctx: NotifierContext,
        dispatcher: BroadcastDispatcher,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            source,
            ctx,
            dispatcher,
            config,
            session_id: None,
            subscriptions: Vec::new(),
        }
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn dispatcher(&self) -> &BroadcastDispatcher {
        &self.dispatcher
    }

    /// Subscribe against whatever session the source currently has.
    pub async fn establish(&mut self) {
        tracing::info!(
            entity_id = %self.ctx.entity.id,
            targets = self.ctx.registry.count(),
            chat_monitoring = self.config.topics.contains(&Topic::ChatMessage),
            "stream notifier ready"
        );
        match self.source.current_session_id() {
            Some(session_id) => self.resubscribe(session_id).await,
            None => tracing::info!("waiting for upstream session"),
        }
    }

    /// Recreate every subscription if any is due to expire; otherwise
    /// subscribe only the topics that are missing.
    pub async fn renew_if_due(&mut self, now: DateTime<Utc>) {
        let Some(session_id) = self.session_id.clone() else {
            return;
        };
        let expiring = self
            .subscriptions
            .iter()
            .any(|s| s.expires_within(now, self.config.tick));
        if expiring {
            tracing::info!(session_id = %session_id, "renewing expiring subscriptions");
            self.resubscribe(session_id).await;
            return;
        }

        let missing = self.missing_topics();
        if !missing.is_empty() {
            tracing::info!(session_id = %session_id, missing = missing.len(), "retrying missing subscriptions");
            self.subscribe_topics(&session_id, missing).await;
        }
    }

    /// Configured topics with no subscription on the current session.
    fn missing_topics(&self) -> Vec<Topic> {
        self.config
            .topics
            .iter()
            .copied()
            .filter(|topic| {
                !self.subscriptions.iter().any(|s| {
                    s.topic == *topic
                        && Some(s.transport_session_id.as_str()) == self.session_id.as_deref()
                })
            })
            .collect()
    }

    /// Drop all subscriptions and create fresh ones on `session_id`.
    async fn resubscribe(&mut self, session_id: String) {
        self.session_id = Some(session_id.clone());
        self.subscriptions.clear();
        let topics = self.config.topics.clone();
        self.subscribe_topics(&session_id, topics).await;
    }

    async fn subscribe_topics(&mut self, session_id: &str, topics: Vec<Topic>) {
        for topic in topics {
            let request = SubscribeRequest {
                topic,
                session_id: session_id.to_string(),
                entity_id: self.ctx.entity.id.clone(),
                user_id: match topic {
                    Topic::ChatMessage => self.config.bot_user_id.clone(),
                    _ => None,
                },
            };
            match self.source.subscribe(&request).await {
                Ok(()) => {
                    tracing::debug!(topic = %topic, session_id = %session_id, "subscribed");
                    self.subscriptions.push(Subscription {
                        topic,
                        transport_session_id: session_id.to_string(),
                        created_at: Utc::now(),
                        ttl: self.config.ttl,
                    });
                }
                Err(e) => {
                    tracing::warn!(topic = %topic, session_id = %session_id, "subscription failed, will retry: {}", e);
                }
            }
        }
    }

    /// Process one event.
    pub async fn handle(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::SessionWelcome { session_id } => {
                if self.session_id.as_deref() == Some(session_id.as_str())
                    && self.subscriptions.len() == self.config.topics.len()
                {
                    tracing::debug!(session_id = %session_id, "session already subscribed");
                    return;
                }
                tracing::info!(session_id = %session_id, "upstream session established");
                self.resubscribe(session_id).await;
            }
            SourceEvent::SessionLost { reason } => {
                tracing::warn!(
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "upstream session lost, subscriptions dropped"
                );
                self.session_id = None;
                self.subscriptions.clear();
            }
            SourceEvent::SubscriptionFailed {
                topic,
                session_id,
                reason,
            } => {
                let before = self.subscriptions.len();
                self.subscriptions
                    .retain(|s| !(s.topic == topic && s.transport_session_id == session_id));
                if self.subscriptions.len() < before {
                    tracing::warn!(
                        topic = %topic,
                        session_id = %session_id,
                        reason = reason.as_deref().unwrap_or("unknown"),
                        "subscription rejected upstream, will retry"
                    );
                } else {
                    tracing::debug!(topic = %topic, session_id = %session_id, "ignoring failure for unknown subscription");
                }
            }
            SourceEvent::Event { event } => self.route(event).await,
        }
    }

    async fn route(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::StateChanged(change) => {
                self.dispatcher.on_state_changed(&change).await;
            }
            DomainEvent::InboundMessage(message) => {
                let outcome =
                    commands::handle_inbound(&self.ctx, &message, self.dispatcher.live_state()).await;
                if outcome == InboundOutcome::AutoRegistered {
                    tracing::debug!(target_id = %message.chat_id, "chat auto-registered");
                }
            }
            DomainEvent::ChatActivity {
                chatter,
                role,
                text,
            } => {
                tracing::info!("{} {}: {}", role.tag(), chatter, text);
                if role != ChatterRole::Broadcaster {
                    let title = format!("{} in chat", chatter);
                    self.ctx.desktop.notify(&title, &text, Urgency::Normal);
                }
            }
        }
    }

    /// Run until `shutdown` resolves or every event sender is gone.
    pub async fn run<F>(mut self, mut events: mpsc::Receiver<SourceEvent>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.establish().await;

        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutting down stream notifier");
                    break;
                }
                next = events.recv() => match next {
                    Some(event) => self.handle(event).await,
                    None => {
                        tracing::info!("event stream closed");
                        break;
                    }
                },
                _ = tick.tick() => self.renew_if_due(Utc::now()).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use gtg_delivery::InboundMessage;
    use gtg_targets::{RegistrationPolicy, TargetKind};
    use tempfile::tempdir;

    use crate::error::SourceError;
    use crate::event::StateChange;
    use crate::state::LiveState;
    use crate::strategy::NotificationStrategy;
    use crate::test_support::{context_with_notifier, RecordingChannel};

    #[derive(Default)]
    struct FakeSource {
        session: Mutex<Option<String>>,
        requests: Mutex<Vec<SubscribeRequest>>,
        fail_topics: Mutex<Vec<Topic>>,
    }

    #[async_trait]
    impl EventSource for FakeSource {
        fn current_session_id(&self) -> Option<String> {
            self.session.lock().unwrap().clone()
        }

        async fn subscribe(&self, request: &SubscribeRequest) -> Result<(), SourceError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail_topics.lock().unwrap().contains(&request.topic) {
                return Err(SourceError::Rejected("scripted".into()));
            }
            Ok(())
        }
    }

    fn supervisor(
        dir: &tempfile::TempDir,
        source: FakeSource,
        bot: Option<&str>,
    ) -> (SubscriptionSupervisor<FakeSource>, std::sync::Arc<RecordingChannel>) {
        let (ctx, channel, _) =
            context_with_notifier(dir, RegistrationPolicy::default(), RecordingChannel::new());
        let dispatcher = BroadcastDispatcher::new(ctx.clone(), NotificationStrategy::Broadcast);
        let config = SupervisorConfig::for_bot(bot.map(String::from));
        (SubscriptionSupervisor::new(source, ctx, dispatcher, config), channel)
    }

    fn topics_requested(sup: &SubscriptionSupervisor<FakeSource>) -> Vec<(Topic, String)> {
        sup.source
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.topic, r.session_id.clone()))
            .collect()
    }

    #[tokio::test]
    async fn establish_subscribes_state_topics() {
        let dir = tempdir().unwrap();
        let source = FakeSource::default();
        *source.session.lock().unwrap() = Some("s-1".into());
        let (mut sup, _) = supervisor(&dir, source, None);

        sup.establish().await;

        assert_eq!(
            topics_requested(&sup),
            vec![
                (Topic::StreamOnline, "s-1".to_string()),
                (Topic::StreamOffline, "s-1".to_string())
            ]
        );
        assert_eq!(sup.subscriptions().len(), 2);
    }

    #[tokio::test]
    async fn chat_topic_uses_bot_account() {
        let dir = tempdir().unwrap();
        let source = FakeSource::default();
        *source.session.lock().unwrap() = Some("s-1".into());
        let (mut sup, _) = supervisor(&dir, source, Some("bot-9"));

        sup.establish().await;

        let requests = sup.source.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].topic, Topic::ChatMessage);
        assert_eq!(requests[2].user_id.as_deref(), Some("bot-9"));
        assert!(requests[0].user_id.is_none());
    }

    #[tokio::test]
    async fn session_replacement_recreates_everything() {
        let dir = tempdir().unwrap();
        let source = FakeSource::default();
        *source.session.lock().unwrap() = Some("s-1".into());
        let (mut sup, _) = supervisor(&dir, source, None);
        sup.establish().await;

        sup.handle(SourceEvent::SessionWelcome {
            session_id: "s-2".into(),
        })
        .await;

        assert_eq!(sup.session_id(), Some("s-2"));
        assert!(sup
            .subscriptions()
            .iter()
            .all(|s| s.transport_session_id == "s-2"));
        assert_eq!(sup.subscriptions().len(), 2);
        assert_eq!(topics_requested(&sup).len(), 4);
    }

    #[tokio::test]
    async fn repeated_welcome_for_same_session_is_ignored() {
        let dir = tempdir().unwrap();
        let (mut sup, _) = supervisor(&dir, FakeSource::default(), None);

        let welcome = SourceEvent::SessionWelcome {
            session_id: "s-1".into(),
        };
        sup.handle(welcome.clone()).await;
        sup.handle(welcome).await;

        assert_eq!(topics_requested(&sup).len(), 2);
    }

    #[tokio::test]
    async fn session_loss_drops_subscriptions() {
        let dir = tempdir().unwrap();
        let (mut sup, _) = supervisor(&dir, FakeSource::default(), None);
        sup.handle(SourceEvent::SessionWelcome {
            session_id: "s-1".into(),
        })
        .await;

        sup.handle(SourceEvent::SessionLost { reason: None }).await;
        assert!(sup.subscriptions().is_empty());
        assert!(sup.session_id().is_none());

        // Nothing to renew without a session.
        sup.renew_if_due(Utc::now()).await;
        assert_eq!(topics_requested(&sup).len(), 2);
    }

    #[tokio::test]
    async fn failed_subscription_is_retried_on_tick() {
        let dir = tempdir().unwrap();
        let source = FakeSource::default();
        source.fail_topics.lock().unwrap().push(Topic::StreamOffline);
        let (mut sup, _) = supervisor(&dir, source, None);

        sup.handle(SourceEvent::SessionWelcome {
            session_id: "s-1".into(),
        })
        .await;
        assert_eq!(sup.subscriptions().len(), 1);

        sup.source.fail_topics.lock().unwrap().clear();
        sup.renew_if_due(Utc::now()).await;
        assert_eq!(sup.subscriptions().len(), 2);

        // Only the missing topic is requested again.
        assert_eq!(
            topics_requested(&sup),
            vec![
                (Topic::StreamOnline, "s-1".to_string()),
                (Topic::StreamOffline, "s-1".to_string()),
                (Topic::StreamOffline, "s-1".to_string()),
            ]
        );

        // Nothing is missing any more.
        sup.renew_if_due(Utc::now()).await;
        assert_eq!(topics_requested(&sup).len(), 3);
    }

    #[tokio::test]
    async fn upstream_rejection_is_retried_on_tick() {
        let dir = tempdir().unwrap();
        let (mut sup, _) = supervisor(&dir, FakeSource::default(), None);
        sup.handle(SourceEvent::SessionWelcome {
            session_id: "s-1".into(),
        })
        .await;
        assert_eq!(sup.subscriptions().len(), 2);

        sup.handle(SourceEvent::SubscriptionFailed {
            topic: Topic::StreamOnline,
            session_id: "s-1".into(),
            reason: Some("conflict".into()),
        })
        .await;
        assert_eq!(sup.subscriptions().len(), 1);
        assert_eq!(sup.subscriptions()[0].topic, Topic::StreamOffline);

        sup.renew_if_due(Utc::now()).await;
        assert_eq!(sup.subscriptions().len(), 2);
        let requested = topics_requested(&sup);
        assert_eq!(requested.len(), 3);
        assert_eq!(requested[2], (Topic::StreamOnline, "s-1".to_string()));
    }

    #[tokio::test]
    async fn rejection_for_an_old_session_is_ignored() {
        let dir = tempdir().unwrap();
        let (mut sup, _) = supervisor(&dir, FakeSource::default(), None);
        sup.handle(SourceEvent::SessionWelcome {
            session_id: "s-2".into(),
        })
        .await;

        sup.handle(SourceEvent::SubscriptionFailed {
            topic: Topic::StreamOnline,
            session_id: "s-1".into(),
            reason: None,
        })
        .await;
        assert_eq!(sup.subscriptions().len(), 2);
    }

    #[tokio::test]
    async fn subscriptions_are_renewed_before_expiry() {
        let dir = tempdir().unwrap();
        let (mut sup, _) = supervisor(&dir, FakeSource::default(), None);
        sup.handle(SourceEvent::SessionWelcome {
            session_id: "s-1".into(),
        })
        .await;

        // Fresh subscriptions are left alone.
        sup.renew_if_due(Utc::now()).await;
        assert_eq!(topics_requested(&sup).len(), 2);

        // Within one tick of the TTL, everything is recreated.
        let almost_expired = Utc::now() + chrono::Duration::seconds(3600 - 30);
        sup.renew_if_due(almost_expired).await;
        assert_eq!(topics_requested(&sup).len(), 4);
    }

    #[test]
    fn subscription_expiry_window() {
        let created_at = Utc::now();
        let sub = Subscription {
            topic: Topic::StreamOnline,
            transport_session_id: "s".into(),
            created_at,
            ttl: Duration::from_secs(100),
        };
        assert_eq!(sub.expires_at(), created_at + chrono::Duration::seconds(100));
        assert!(!sub.expires_within(created_at, Duration::from_secs(10)));
        assert!(sub.expires_within(created_at + chrono::Duration::seconds(95), Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn events_are_routed() {
        let dir = tempdir().unwrap();
        let (mut sup, channel) = supervisor(&dir, FakeSource::default(), None);

        sup.handle(SourceEvent::from(InboundMessage {
            chat_id: "-1".into(),
            chat_kind: TargetKind::Group,
            chat_title: Some("Friends".into()),
            sender_id: "5".into(),
            text: "hello".into(),
        }))
        .await;
        assert!(sup.ctx.registry.contains("-1"));

        sup.handle(SourceEvent::from(DomainEvent::StateChanged(StateChange::online("42"))))
            .await;
        assert_eq!(sup.dispatcher().live_state(), LiveState::Online);
        assert_eq!(channel.attempts_for("-1"), 1);
    }

    #[tokio::test]
    async fn run_stops_when_senders_are_gone() {
        let dir = tempdir().unwrap();
        let (sup, channel) = supervisor(&dir, FakeSource::default(), None);
        let (tx, rx) = mpsc::channel(8);

        tx.send(SourceEvent::from(InboundMessage {
            chat_id: "-1".into(),
            chat_kind: TargetKind::Group,
            chat_title: None,
            sender_id: "5".into(),
            text: "hi".into(),
        }))
        .await
        .unwrap();
        tx.send(SourceEvent::from(DomainEvent::StateChanged(StateChange::online("42"))))
            .await
            .unwrap();
        drop(tx);

        sup.run(rx, std::future::pending()).await;
        assert_eq!(channel.attempts_for("-1"), 1);
    }
}
