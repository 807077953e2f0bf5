// state.rs — LiveState: de-duplication of upstream state changes.
//
//   Unknown ──online──▶ Online ──offline──▶ Offline ──online──▶ Online
//      │                                       ▲
//      └──────────────offline (silent)─────────┘
//
// Only the two transitions into and out of Online produce a notification.
// Repeats of the current state are suppressed. The state lives in memory
// only, so a restart forgets it and may re-announce a stream once.

use std::fmt;

/// Last known live state of the monitored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiveState {
    #[default]
    Unknown,
    Offline,
    Online,
}

/// A state change worth notifying about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentLive,
    Ended,
}

impl fmt::Display for LiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveState::Unknown => write!(f, "unknown"),
            LiveState::Offline => write!(f, "offline"),
            LiveState::Online => write!(f, "live"),
        }
    }
}

impl LiveState {
    /// Record an observed state and report whether it is a transition.
    pub fn observe(&mut self, online: bool) -> Option<Transition> {
        let next = if online {
            LiveState::Online
        } else {
            LiveState::Offline
        };
        let transition = match (*self, next) {
            (LiveState::Unknown | LiveState::Offline, LiveState::Online) => {
                Some(Transition::WentLive)
            }
            (LiveState::Online, LiveState::Offline) => Some(Transition::Ended),
            _ => None,
        };
        *self = next;
        transition
    }
}
