// event.rs — Domain events, subscription topics and source events.
//
// The upstream source (via its bridge) and the Telegram poller both feed one
// stream of SourceEvents into the supervisor. SourceEvents either carry a
// DomainEvent or report a change in the upstream transport session.
//
// These types double as the bridge wire format, so they serialize as
// internally tagged JSON:
//
//   {"kind": "session_welcome", "session_id": "abc"}
//   {"kind": "subscription_failed", "topic": "stream.online", "session_id": "abc", "reason": "..."}
//   {"kind": "event", "event": {"event_type": "state_changed", "online": true, "entity_id": "42"}}

use std::fmt;

use serde::{Deserialize, Serialize};

use gtg_delivery::InboundMessage;

/// Upstream subscription topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "stream.online")]
    StreamOnline,
    #[serde(rename = "stream.offline")]
    StreamOffline,
    #[serde(rename = "channel.chat.message")]
    ChatMessage,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::StreamOnline => write!(f, "stream.online"),
            Topic::StreamOffline => write!(f, "stream.offline"),
            Topic::ChatMessage => write!(f, "channel.chat.message"),
        }
    }
}

/// Stream metadata the upstream may attach to a state change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDetails {
    #[serde(default)]
    pub display_name: Option<String>,
    /// Login name, used to build the channel URL.
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// The monitored entity went online or offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub online: bool,
    pub entity_id: String,
    #[serde(default)]
    pub details: Option<StreamDetails>,
}

impl StateChange {
    pub fn online(entity_id: impl Into<String>) -> Self {
        Self {
            online: true,
            entity_id: entity_id.into(),
            details: None,
        }
    }

    pub fn offline(entity_id: impl Into<String>) -> Self {
        Self {
            online: false,
            entity_id: entity_id.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: StreamDetails) -> Self {
        self.details = Some(details);
        self
    }
}

/// Role of a viewer in the monitored channel's chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatterRole {
    Broadcaster,
    Moderator,
    Subscriber,
    Viewer,
}

impl ChatterRole {
    /// Short tag used when logging chat lines.
    pub fn tag(&self) -> &'static str {
        match self {
            ChatterRole::Broadcaster => "[STREAMER]",
            ChatterRole::Moderator => "[MOD]",
            ChatterRole::Subscriber => "[SUB]",
            ChatterRole::Viewer => "[CHAT]",
        }
    }
}

/// Decoded events, consumed once by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// The monitored entity changed live state.
    StateChanged(StateChange),

    /// A message to the bot (registration and commands).
    InboundMessage(InboundMessage),

    /// A message in the monitored channel's own chat.
    ChatActivity {
        chatter: String,
        role: ChatterRole,
        text: String,
    },
}

/// Everything the supervisor's event loop receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceEvent {
    /// A transport session is (re)established. Subscriptions tied to any
    /// earlier session are gone.
    SessionWelcome { session_id: String },

    /// The transport session dropped.
    SessionLost {
        #[serde(default)]
        reason: Option<String>,
    },

    /// The upstream refused (or dropped) a subscription sent earlier.
    SubscriptionFailed {
        topic: Topic,
        session_id: String,
        #[serde(default)]
        reason: Option<String>,
    },

    /// A decoded domain event.
    Event { event: DomainEvent },
}

impl From<DomainEvent> for SourceEvent {
    fn from(event: DomainEvent) -> Self {
        SourceEvent::Event { event }
    }
}

impl From<InboundMessage> for SourceEvent {
    fn from(message: InboundMessage) -> Self {
        SourceEvent::Event {
            event: DomainEvent::InboundMessage(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gtg_targets::TargetKind;

    #[test]
    fn bridge_state_change_line_parses() {
        let line = r#"{"kind": "event", "event": {"event_type": "state_changed", "online": true,
            "entity_id": "42", "details": {"display_name": "Ann", "login": "ann", "title": "Speedrun"}}}"#;
        let parsed: SourceEvent = serde_json::from_str(line).unwrap();
        match parsed {
            SourceEvent::Event {
                event: DomainEvent::StateChanged(change),
            } => {
                assert!(change.online);
                assert_eq!(change.entity_id, "42");
                let details = change.details.unwrap();
                assert_eq!(details.login.as_deref(), Some("ann"));
                assert!(details.category.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn session_lines_parse() {
        let welcome: SourceEvent =
            serde_json::from_str(r#"{"kind": "session_welcome", "session_id": "s-1"}"#).unwrap();
        assert_eq!(
            welcome,
            SourceEvent::SessionWelcome {
                session_id: "s-1".into()
            }
        );

        let lost: SourceEvent = serde_json::from_str(r#"{"kind": "session_lost"}"#).unwrap();
        assert_eq!(lost, SourceEvent::SessionLost { reason: None });

        let failed: SourceEvent = serde_json::from_str(
            r#"{"kind": "subscription_failed", "topic": "channel.chat.message", "session_id": "s-1"}"#,
        )
        .unwrap();
        assert_eq!(
            failed,
            SourceEvent::SubscriptionFailed {
                topic: Topic::ChatMessage,
                session_id: "s-1".into(),
                reason: None,
            }
        );
    }

    #[test]
    fn chat_activity_round_trips_with_tag() {
        let event = DomainEvent::ChatActivity {
            chatter: "mod_amy".into(),
            role: ChatterRole::Moderator,
            text: "hi chat".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"chat_activity\""));
        assert!(json.contains("\"role\":\"moderator\""));
    }

    #[test]
    fn inbound_message_converts_to_source_event() {
        let message = InboundMessage {
            chat_id: "-1".into(),
            chat_kind: TargetKind::Group,
            chat_title: None,
            sender_id: "9".into(),
            text: "hello".into(),
        };
        let event = SourceEvent::from(message.clone());
        assert_eq!(
            event,
            SourceEvent::Event {
                event: DomainEvent::InboundMessage(message)
            }
        );
    }

    #[test]
    fn topic_names_match_upstream() {
        assert_eq!(Topic::StreamOnline.to_string(), "stream.online");
        assert_eq!(
            serde_json::to_string(&Topic::ChatMessage).unwrap(),
            "\"channel.chat.message\""
        );
    }
}
