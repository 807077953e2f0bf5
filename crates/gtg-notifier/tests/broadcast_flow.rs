// broadcast_flow.rs — End-to-end run of the notifier core.
//
// Drives a real SubscriptionSupervisor, TargetRegistry and on-disk
// TargetStore through the same event channel the daemon uses. Only the
// edges are faked: the upstream source and the chat transport.
//
//   1. Empty store, bridge announces a session → subscriptions created
//   2. Group chat says "hello" → auto-registered and persisted
//   3. Stream goes online → one "went live" delivery
//   4. Duplicate online → nothing
//   5. Stream goes offline → one "ended" delivery
//
// A second test checks failure isolation: one permanently unreachable
// target is pruned, every other target still gets exactly one attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::tempdir;
use tokio::sync::mpsc;

use gtg_delivery::{
    DeliveryChannel, DeliveryErrorKind, DeliveryResult, InboundMessage, NullNotifier,
    OutboundMessage,
};
use gtg_notifier::{
    BroadcastDispatcher, DomainEvent, EventSource, MonitoredEntity, NotificationStrategy,
    NotifierContext, SourceError, SourceEvent, StateChange, SubscribeRequest,
    SubscriptionSupervisor, SupervisorConfig, Topic,
};
use gtg_targets::{RegistrationPolicy, TargetKind, TargetRegistry, TargetStore};

#[derive(Default)]
struct FakeSource {
    requests: Arc<Mutex<Vec<SubscribeRequest>>>,
}

#[async_trait]
impl EventSource for FakeSource {
    fn current_session_id(&self) -> Option<String> {
        None
    }

    async fn subscribe(&self, request: &SubscribeRequest) -> Result<(), SourceError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeTelegram {
    sent: Mutex<Vec<(String, String)>>,
    unreachable: HashMap<String, DeliveryErrorKind>,
}

impl FakeTelegram {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryChannel for FakeTelegram {
    async fn deliver(&self, target_id: &str, message: &OutboundMessage) -> DeliveryResult {
        self.sent
            .lock()
            .unwrap()
            .push((target_id.to_string(), message.text.clone()));
        match self.unreachable.get(target_id) {
            Some(kind) => DeliveryResult::failed(*kind, "Forbidden: bot was kicked"),
            None => DeliveryResult::delivered(),
        }
    }

    fn channel_id(&self) -> &str {
        "fake-telegram"
    }
}

fn build(
    store_path: std::path::PathBuf,
    channel: Arc<FakeTelegram>,
) -> (NotifierContext, BroadcastDispatcher) {
    let store = Arc::new(TargetStore::open(store_path));
    let mut entity = MonitoredEntity::new("42");
    entity.display_name = Some("Ann".into());
    let ctx = NotifierContext {
        registry: Arc::new(TargetRegistry::new(store, RegistrationPolicy::default())),
        channel,
        desktop: Arc::new(NullNotifier),
        entity,
    };
    let dispatcher = BroadcastDispatcher::new(ctx.clone(), NotificationStrategy::Broadcast);
    (ctx, dispatcher)
}

#[tokio::test]
async fn group_hello_then_one_message_per_transition() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("telegram_chats.json");
    let telegram = Arc::new(FakeTelegram::default());
    let (ctx, dispatcher) = build(store_path.clone(), telegram.clone());
    assert_eq!(ctx.registry.count(), 0);

    let source = FakeSource::default();
    let requests = source.requests.clone();
    let supervisor = SubscriptionSupervisor::new(
        source,
        ctx.clone(),
        dispatcher,
        SupervisorConfig::for_bot(None),
    );

    let (tx, rx) = mpsc::channel(16);
    let events = vec![
        SourceEvent::SessionWelcome {
            session_id: "s-1".into(),
        },
        SourceEvent::from(InboundMessage {
            chat_id: "-100".into(),
            chat_kind: TargetKind::Group,
            chat_title: Some("Friends".into()),
            sender_id: "5".into(),
            text: "hello".into(),
        }),
        SourceEvent::from(DomainEvent::StateChanged(StateChange::online("42"))),
        SourceEvent::from(DomainEvent::StateChanged(StateChange::online("42"))),
        SourceEvent::from(DomainEvent::StateChanged(StateChange::offline("42"))),
    ];
    for event in events {
        tx.send(event).await.unwrap();
    }
    drop(tx);

    supervisor.run(rx, std::future::pending()).await;

    // Subscriptions were created on the announced session.
    let topics: Vec<Topic> = requests.lock().unwrap().iter().map(|r| r.topic).collect();
    assert_eq!(topics, vec![Topic::StreamOnline, Topic::StreamOffline]);

    // Exactly one "went live" and one "ended", both to the group.
    let sent = telegram.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, "-100");
    assert!(sent[0].1.contains("Ann is LIVE!"));
    assert_eq!(sent[1], ("-100".to_string(), "⚫ Ann went offline".to_string()));

    // The registration survived on disk.
    let reopened = TargetStore::open(&store_path);
    let target = reopened.get("-100").unwrap();
    assert_eq!(target.kind, TargetKind::Group);
    assert_eq!(target.title.as_deref(), Some("Friends"));
}

#[tokio::test]
async fn unreachable_target_is_pruned_without_affecting_others() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("telegram_chats.json");
    let mut telegram = FakeTelegram::default();
    telegram
        .unreachable
        .insert("-3".into(), DeliveryErrorKind::PermanentUnreachable);
    telegram
        .unreachable
        .insert("-4".into(), DeliveryErrorKind::Transient);
    let telegram = Arc::new(telegram);
    let (ctx, mut dispatcher) = build(store_path.clone(), telegram.clone());

    for id in ["-1", "-2", "-3", "-4", "-5"] {
        ctx.registry.add(id, TargetKind::Group).unwrap();
    }

    let report = dispatcher
        .on_state_changed(&StateChange::online("42"))
        .await
        .unwrap();

    assert_eq!(report.attempted, 5);
    assert_eq!(report.delivered, 3);
    assert_eq!(report.pruned, 1);
    assert_eq!(report.transient, vec!["-4".to_string()]);

    for id in ["-1", "-2", "-3", "-4", "-5"] {
        let attempts = telegram.sent().iter().filter(|(t, _)| t == id).count();
        assert_eq!(attempts, 1, "target {} attempts", id);
    }

    // Only the permanently unreachable target is gone, in memory and on disk.
    assert!(!ctx.registry.contains("-3"));
    assert!(ctx.registry.contains("-4"));
    assert_eq!(ctx.registry.count(), 4);
    assert_eq!(TargetStore::open(&store_path).len(), 4);
}
