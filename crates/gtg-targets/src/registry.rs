// registry.rs — TargetRegistry: registration rules over the TargetStore.
//
// The store knows how to persist targets; the registry decides which chats
// get in and which ones a broadcast should reach:
//
//   - group chats register themselves on any message (auto-discovery)
//   - direct chats only register on an explicit `/start`
//   - direct targets can be left out of broadcasts entirely

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TargetError;
use crate::store::TargetStore;
use crate::target::{Target, TargetKind};

/// Which chats may register and which ones receive broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationPolicy {
    /// Register group chats on any message, not only on `/start`.
    #[serde(default = "default_true")]
    pub auto_register_groups: bool,

    /// Include direct-chat targets in broadcasts.
    #[serde(default = "default_true")]
    pub include_direct: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self {
            auto_register_groups: true,
            include_direct: true,
        }
    }
}

impl RegistrationPolicy {
    /// Whether a message from a chat of `kind` may register it.
    pub fn allows(&self, kind: TargetKind, is_explicit_command: bool) -> bool {
        match kind {
            _ if is_explicit_command => true,
            TargetKind::Group => self.auto_register_groups,
            TargetKind::Direct => false,
        }
    }
}

/// Policy-aware view over a [`TargetStore`].
///
/// Cheap to share: the store sits behind an `Arc` and does its own locking.
pub struct TargetRegistry {
    store: Arc<TargetStore>,
    policy: RegistrationPolicy,
}

impl TargetRegistry {
    pub fn new(store: Arc<TargetStore>, policy: RegistrationPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RegistrationPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<TargetStore> {
        &self.store
    }

    /// Targets that should receive a broadcast, ordered by id.
    pub fn list_active(&self) -> Vec<Target> {
        self.store
            .snapshot()
            .targets
            .into_values()
            .filter(|t| self.policy.include_direct || !t.is_direct())
            .collect()
    }

    /// Number of targets a broadcast would currently reach.
    pub fn active_count(&self) -> usize {
        self.list_active().len()
    }

    /// Number of stored targets regardless of broadcast policy.
    pub fn count(&self) -> usize {
        self.store.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.store.contains(id)
    }

    /// Register the chat a message came from, if policy allows.
    ///
    /// Returns `Ok(true)` only when a new target was stored. Rejected
    /// chats and already-registered chats both return `Ok(false)`.
    pub fn register_from_message(
        &self,
        chat_id: &str,
        chat_kind: TargetKind,
        chat_title: Option<String>,
        is_explicit_command: bool,
    ) -> Result<bool, TargetError> {
        if !self.policy.allows(chat_kind, is_explicit_command) {
            tracing::debug!(target_id = %chat_id, kind = %chat_kind, "registration not allowed without /start");
            return Ok(false);
        }

        let added = self.store.add(chat_id, chat_kind, chat_title.clone())?;
        if added {
            tracing::info!(
                target_id = %chat_id,
                kind = %chat_kind,
                title = chat_title.as_deref().unwrap_or("unknown"),
                "registered new target"
            );
        }
        Ok(added)
    }

    pub fn add(&self, id: &str, kind: TargetKind) -> Result<bool, TargetError> {
        self.store.add(id, kind, None)
    }

    pub fn remove(&self, id: &str) -> Result<bool, TargetError> {
        let removed = self.store.remove(id)?;
        if removed {
            tracing::info!(target_id = %id, "removed target");
        }
        Ok(removed)
    }

    /// Drop every target that proved permanently unreachable, in one write.
    pub fn prune(&self, ids: &HashSet<String>) -> Result<usize, TargetError> {
        let removed = self.store.prune(ids)?;
        if removed > 0 {
            tracing::info!(removed, "pruned unreachable targets");
        }
        Ok(removed)
    }
}
