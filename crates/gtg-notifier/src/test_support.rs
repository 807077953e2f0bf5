// test_support.rs — Recording fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use gtg_delivery::{
    DeliveryChannel, DeliveryErrorKind, DeliveryResult, DesktopNotifier, OutboundMessage, Urgency,
};
use gtg_targets::{RegistrationPolicy, TargetRegistry, TargetStore};

use crate::context::{MonitoredEntity, NotifierContext};

/// Records every delivery; fails for configured targets.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(String, OutboundMessage)>>,
    failures: HashMap<String, DeliveryErrorKind>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, target_id: &str, kind: DeliveryErrorKind) -> Self {
        self.failures.insert(target_id.to_string(), kind);
        self
    }

    pub fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, target_id: &str) -> usize {
        self.sent().iter().filter(|(id, _)| id == target_id).count()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    async fn deliver(&self, target_id: &str, message: &OutboundMessage) -> DeliveryResult {
        self.sent
            .lock()
            .unwrap()
            .push((target_id.to_string(), message.clone()));
        match self.failures.get(target_id) {
            Some(kind) => DeliveryResult::failed(*kind, "scripted failure"),
            None => DeliveryResult::delivered(),
        }
    }

    fn channel_id(&self) -> &str {
        "recording"
    }
}

/// Records desktop notifications instead of showing them.
#[derive(Default)]
pub struct RecordingNotifier {
    pub shown: Mutex<Vec<(String, String, Urgency)>>,
}

impl DesktopNotifier for RecordingNotifier {
    fn notify(&self, title: &str, body: &str, urgency: Urgency) {
        self.shown
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string(), urgency));
    }
}

/// A context backed by a store in `dir`, with recording collaborators.
pub fn context(
    dir: &TempDir,
    policy: RegistrationPolicy,
    channel: RecordingChannel,
) -> (NotifierContext, Arc<RecordingChannel>) {
    let (ctx, channel, _) = context_with_notifier(dir, policy, channel);
    (ctx, channel)
}

pub fn context_with_notifier(
    dir: &TempDir,
    policy: RegistrationPolicy,
    channel: RecordingChannel,
) -> (NotifierContext, Arc<RecordingChannel>, Arc<RecordingNotifier>) {
    let store = Arc::new(TargetStore::open(dir.path().join("targets.json")));
    let channel = Arc::new(channel);
    let notifier = Arc::new(RecordingNotifier::default());
    let mut entity = MonitoredEntity::new("42");
    entity.display_name = Some("Ann".into());
    entity.login = Some("ann".into());
    let ctx = NotifierContext {
        registry: Arc::new(TargetRegistry::new(store, policy)),
        channel: channel.clone(),
        desktop: notifier.clone(),
        entity,
    };
    (ctx, channel, notifier)
}
