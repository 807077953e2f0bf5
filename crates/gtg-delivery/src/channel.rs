// channel.rs — DeliveryChannel trait and the delivery outcome taxonomy.
//
// Every transport (Telegram today, anything else later) implements the same
// trait and reports the same four outcomes. The dispatcher only looks at
// the classification, never at transport-specific error text:
//
//   None                  → delivered
//   PermanentUnreachable  → target is gone (blocked, kicked, deleted), prune it
//   Transient             → rate limited / network trouble, skip this round
//   Unknown               → anything else, logged and kept

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use gtg_targets::TargetKind;

/// How the text of an outbound message should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    Plain,
    Markdown,
}

/// A message ready to be sent to any number of targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub format: MessageFormat,
}

impl OutboundMessage {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: MessageFormat::Plain,
        }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: MessageFormat::Markdown,
        }
    }
}

/// Why a delivery failed, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryErrorKind {
    None,
    PermanentUnreachable,
    Transient,
    Unknown,
}

impl fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryErrorKind::None => write!(f, "none"),
            DeliveryErrorKind::PermanentUnreachable => write!(f, "permanent_unreachable"),
            DeliveryErrorKind::Transient => write!(f, "transient"),
            DeliveryErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Outcome of delivering one message to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub ok: bool,
    pub error_kind: DeliveryErrorKind,
    /// Transport error text, for logs only.
    pub detail: Option<String>,
}

impl DeliveryResult {
    pub fn delivered() -> Self {
        Self {
            ok: true,
            error_kind: DeliveryErrorKind::None,
            detail: None,
        }
    }

    pub fn failed(kind: DeliveryErrorKind, detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_kind: kind,
            detail: Some(detail.into()),
        }
    }

    /// The target will never accept messages again and should be pruned.
    pub fn is_permanent(&self) -> bool {
        self.error_kind == DeliveryErrorKind::PermanentUnreachable
    }
}

/// A text message received by the bot, used for target registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub chat_id: String,
    pub chat_kind: TargetKind,
    #[serde(default)]
    pub chat_title: Option<String>,
    pub sender_id: String,
    pub text: String,
}

/// A transport that can deliver a message to a single target.
///
/// Implementations must not retry: one call is one attempt, and the result
/// classification tells the caller what to do about a failure.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Send `message` to `target_id` and classify the outcome.
    async fn deliver(&self, target_id: &str, message: &OutboundMessage) -> DeliveryResult;

    /// Channel identity for logs (e.g., "telegram:@gtg_bot").
    fn channel_id(&self) -> &str;
}

/// Error descriptions that mean the chat will never accept messages again.
const PERMANENT_MARKERS: &[&str] = &[
    "chat not found",
    "bot was blocked",
    "bot was kicked",
    "user is deactivated",
    "chat was deleted",
    "upgraded to a supergroup",
];

/// Classify a failed delivery from its HTTP status (if a response arrived
/// at all) and the transport's error description.
pub fn classify_failure(status: Option<u16>, description: &str) -> DeliveryErrorKind {
    let description = description.to_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| description.contains(m)) {
        return DeliveryErrorKind::PermanentUnreachable;
    }

    match status {
        // No response: connection refused, DNS, timeout.
        None => DeliveryErrorKind::Transient,
        Some(403) => DeliveryErrorKind::PermanentUnreachable,
        Some(429) => DeliveryErrorKind::Transient,
        Some(code) if code >= 500 => DeliveryErrorKind::Transient,
        Some(_) => DeliveryErrorKind::Unknown,
    }
}
