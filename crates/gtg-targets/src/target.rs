// target.rs — Target: one chat that receives stream notifications.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of chat a target is.
///
/// Groups are discovered automatically (any message in a group registers
/// it), while direct chats must opt in explicitly with `/start`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Group,
    Direct,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Group => write!(f, "group"),
            TargetKind::Direct => write!(f, "direct"),
        }
    }
}

impl TargetKind {
    /// Guess the kind of a chat from its numeric id alone.
    ///
    /// Telegram group and channel ids are negative, user ids are positive.
    /// Only used when migrating records that predate the `kind` field.
    pub fn infer_from_id(id: &str) -> Self {
        match id.trim().parse::<i64>() {
            Ok(n) if n < 0 => TargetKind::Group,
            _ => TargetKind::Direct,
        }
    }
}

/// A registered delivery destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    /// Opaque chat identifier understood by the delivery transport.
    pub id: String,

    /// When this target was first registered.
    pub registered_at: DateTime<Utc>,

    /// Group or direct chat.
    pub kind: TargetKind,

    /// Chat title reported at registration time, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Target {
    pub fn new(id: impl Into<String>, kind: TargetKind) -> Self {
        Self {
            id: id.into(),
            registered_at: Utc::now(),
            kind,
            title: None,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn is_direct(&self) -> bool {
        self.kind == TargetKind::Direct
    }
}
