// context.rs — NotifierContext: the shared collaborators, built once at startup.

use std::sync::Arc;

use gtg_delivery::{DeliveryChannel, DesktopNotifier};
use gtg_targets::TargetRegistry;

use crate::event::StreamDetails;

/// The entity whose live state is being watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredEntity {
    /// Upstream user id (what subscriptions are created for).
    pub id: String,
    /// Human-readable name for messages, when upstream events carry none.
    pub display_name: Option<String>,
    /// Login used to build the channel URL, when events carry none.
    pub login: Option<String>,
    /// Prefix of the channel URL, e.g. `https://twitch.tv/`.
    pub url_base: String,
}

impl MonitoredEntity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            login: None,
            url_base: "https://twitch.tv/".to_string(),
        }
    }

    /// Name to show for the entity, preferring what the event reported.
    pub fn name<'a>(&'a self, details: Option<&'a StreamDetails>) -> &'a str {
        details
            .and_then(|d| d.display_name.as_deref())
            .or(self.display_name.as_deref())
            .unwrap_or(&self.id)
    }

    /// Channel URL, if a login is known.
    pub fn url(&self, details: Option<&StreamDetails>) -> Option<String> {
        details
            .and_then(|d| d.login.as_deref())
            .or(self.login.as_deref())
            .map(|login| format!("{}{}", self.url_base, login))
    }
}

/// Explicit process state handed to the dispatcher and supervisor.
#[derive(Clone)]
pub struct NotifierContext {
    pub registry: Arc<TargetRegistry>,
    pub channel: Arc<dyn DeliveryChannel>,
    pub desktop: Arc<dyn DesktopNotifier>,
    pub entity: MonitoredEntity,
}
