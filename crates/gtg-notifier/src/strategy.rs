// strategy.rs — NotificationStrategy: who gets a notification, and how it reads.
//
// Two variants, picked once at startup from configuration:
//
//   SingleTarget: one fixed chat; nothing is discovered or pruned
//   Broadcast:    every active target in the registry; permanently
//                 unreachable targets are pruned after the round
//
// Delivery in a broadcast round is concurrent. All sends are joined before
// the unreachable set is pruned, and the prune is a single store write.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinSet;

use gtg_delivery::{DeliveryErrorKind, DeliveryResult, OutboundMessage};

use crate::context::{MonitoredEntity, NotifierContext};
use crate::event::StreamDetails;

/// Outcome of one delivery round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Targets a delivery was attempted for.
    pub attempted: usize,
    /// Targets that accepted the message.
    pub delivered: usize,
    /// Targets skipped this round (rate limit, network).
    pub transient: Vec<String>,
    /// Targets that failed for an unclassified reason.
    pub unknown: Vec<String>,
    /// Targets that are gone for good.
    pub unreachable: HashSet<String>,
    /// How many targets the registry actually removed.
    pub pruned: usize,
}

impl BroadcastReport {
    fn record(&mut self, target_id: String, result: &DeliveryResult) {
        match result.error_kind {
            DeliveryErrorKind::None => {
                self.delivered += 1;
                tracing::debug!(target_id = %target_id, "delivered");
            }
            DeliveryErrorKind::PermanentUnreachable => {
                tracing::info!(
                    target_id = %target_id,
                    detail = result.detail.as_deref().unwrap_or(""),
                    "target unreachable, will be removed"
                );
                self.unreachable.insert(target_id);
            }
            DeliveryErrorKind::Transient => {
                tracing::warn!(
                    target_id = %target_id,
                    detail = result.detail.as_deref().unwrap_or(""),
                    "transient delivery failure, skipping this round"
                );
                self.transient.push(target_id);
            }
            DeliveryErrorKind::Unknown => {
                tracing::warn!(
                    target_id = %target_id,
                    detail = result.detail.as_deref().unwrap_or(""),
                    "delivery failed"
                );
                self.unknown.push(target_id);
            }
        }
    }
}

/// How notifications are addressed and worded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationStrategy {
    SingleTarget { target_id: String },
    Broadcast,
}

impl NotificationStrategy {
    /// Ids the next round will be delivered to.
    pub fn targets(&self, ctx: &NotifierContext) -> Vec<String> {
        match self {
            NotificationStrategy::SingleTarget { target_id } => vec![target_id.clone()],
            NotificationStrategy::Broadcast => ctx
                .registry
                .list_active()
                .into_iter()
                .map(|t| t.id)
                .collect(),
        }
    }

    /// "Went live" message.
    pub fn format_online(
        &self,
        entity: &MonitoredEntity,
        details: Option<&StreamDetails>,
    ) -> OutboundMessage {
        let name = escape_markdown(entity.name(details));
        let title = details
            .and_then(|d| d.title.as_deref())
            .filter(|t| !t.is_empty())
            .unwrap_or("Stream");
        let title = escape_markdown(title);
        let category = details
            .and_then(|d| d.category.as_deref())
            .filter(|c| !c.is_empty())
            .map(escape_markdown);
        let url = entity.url(details);

        let mut text = match self {
            NotificationStrategy::SingleTarget { .. } => {
                let mut text = format!("💊 {} is LIVE 💊\n{}", name, title);
                if let Some(category) = &category {
                    text.push('/');
                    text.push_str(category);
                }
                text
            }
            NotificationStrategy::Broadcast => {
                let mut text = format!("🔴 *{} is LIVE!*\n\n📺 {}", name, title);
                if let Some(category) = &category {
                    text.push_str(&format!("\n🎮 Playing: {}", category));
                }
                text
            }
        };
        if let Some(url) = url {
            let prefix = match self {
                NotificationStrategy::Broadcast => "🔗 ",
                NotificationStrategy::SingleTarget { .. } => "",
            };
            text.push_str(&format!("\n{}{}", prefix, escape_markdown(&url)));
        }
        OutboundMessage::markdown(text)
    }

    /// "Ended" message.
    pub fn format_offline(
        &self,
        entity: &MonitoredEntity,
        details: Option<&StreamDetails>,
    ) -> OutboundMessage {
        OutboundMessage::plain(format!("⚫ {} went offline", entity.name(details)))
    }

    /// Deliver `message` to every target of this strategy and prune the
    /// ones that turned out to be permanently unreachable.
    pub async fn deliver(&self, ctx: &NotifierContext, message: &OutboundMessage) -> BroadcastReport {
        let targets = self.targets(ctx);
        let mut report = BroadcastReport {
            attempted: targets.len(),
            ..Default::default()
        };

        if targets.is_empty() {
            tracing::info!("no registered targets - send /start to the bot in your groups");
            return report;
        }

        let message = Arc::new(message.clone());
        let mut sends = JoinSet::new();
        for target_id in targets {
            let channel = Arc::clone(&ctx.channel);
            let message = Arc::clone(&message);
            sends.spawn(async move {
                let result = channel.deliver(&target_id, &message).await;
                (target_id, result)
            });
        }

        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((target_id, result)) => report.record(target_id, &result),
                Err(e) => tracing::warn!("delivery task failed: {}", e),
            }
        }

        match self {
            NotificationStrategy::Broadcast if !report.unreachable.is_empty() => {
                match ctx.registry.prune(&report.unreachable) {
                    Ok(removed) => report.pruned = removed,
                    Err(e) => {
                        tracing::error!("failed to prune unreachable targets: {}", e);
                    }
                }
            }
            NotificationStrategy::SingleTarget { target_id } if !report.unreachable.is_empty() => {
                tracing::error!(target_id = %target_id, "configured chat is unreachable");
            }
            _ => {}
        }

        tracing::info!(
            channel = ctx.channel.channel_id(),
            "broadcast complete: {}/{} targets",
            report.delivered,
            report.attempted
        );
        report
    }
}

/// Escape the characters Telegram's legacy Markdown treats as markup.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
