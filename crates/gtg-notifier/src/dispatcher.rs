// dispatcher.rs — BroadcastDispatcher: turns state changes into notifications.
//
// Flow for one StateChanged event:
//   1. LiveState decides whether it is a real transition (duplicates stop here)
//   2. the strategy formats exactly one message for the transition
//   3. the strategy delivers it to every target and prunes dead ones
//   4. going live also raises a desktop notification

use gtg_delivery::Urgency;

use crate::context::NotifierContext;
use crate::event::StateChange;
use crate::state::{LiveState, Transition};
use crate::strategy::{BroadcastReport, NotificationStrategy};

pub struct BroadcastDispatcher {
    ctx: NotifierContext,
    strategy: NotificationStrategy,
    state: LiveState,
    notify_offline: bool,
}

impl BroadcastDispatcher {
    pub fn new(ctx: NotifierContext, strategy: NotificationStrategy) -> Self {
        Self {
            ctx,
            strategy,
            state: LiveState::Unknown,
            notify_offline: true,
        }
    }

    /// Whether "ended" messages are sent (the state is tracked either way).
    pub fn with_offline_notifications(mut self, enabled: bool) -> Self {
        self.notify_offline = enabled;
        self
    }

    pub fn live_state(&self) -> LiveState {
        self.state
    }

    pub fn strategy(&self) -> &NotificationStrategy {
        &self.strategy
    }

    /// Handle a state change. Returns the delivery report if a round ran.
    pub async fn on_state_changed(&mut self, change: &StateChange) -> Option<BroadcastReport> {
        if change.entity_id != self.ctx.entity.id {
            tracing::warn!(
                entity_id = %change.entity_id,
                expected = %self.ctx.entity.id,
                "ignoring state change for another entity"
            );
            return None;
        }

        let details = change.details.as_ref();
        let name = self.ctx.entity.name(details).to_string();

        let Some(transition) = self.state.observe(change.online) else {
            tracing::debug!(entity = %name, state = %self.state, "duplicate state change suppressed");
            return None;
        };

        let message = match transition {
            Transition::WentLive => {
                tracing::info!(entity = %name, "[LIVE] {} started streaming", name);
                self.notify_desktop(change);
                self.strategy.format_online(&self.ctx.entity, details)
            }
            Transition::Ended => {
                tracing::info!(entity = %name, "[OFFLINE] {} went offline", name);
                if !self.notify_offline {
                    return None;
                }
                self.strategy.format_offline(&self.ctx.entity, details)
            }
        };

        Some(self.strategy.deliver(&self.ctx, &message).await)
    }

    fn notify_desktop(&self, change: &StateChange) {
        let details = change.details.as_ref();
        let mut body = details
            .and_then(|d| d.title.clone())
            .unwrap_or_else(|| "Stream".to_string());
        if let Some(category) = details.and_then(|d| d.category.as_deref()) {
            body.push_str(&format!("\nPlaying: {}", category));
        }
        let title = format!("{} is LIVE!", self.ctx.entity.name(details));
        self.ctx.desktop.notify(&title, &body, Urgency::Critical);
    }
}
