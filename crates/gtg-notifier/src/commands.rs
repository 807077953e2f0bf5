// commands.rs — Inbound bot messages: registration and the /start, /status commands.
//
// Every message to the bot lands here. Commands are answered to the chat
// that sent them and nowhere else; plain messages only feed group
// auto-registration and get no reply.

use gtg_delivery::{InboundMessage, OutboundMessage};

use crate::context::NotifierContext;
use crate::state::LiveState;

/// Commands the bot understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    /// Explicitly register this chat.
    Start,
    /// Report registry size and stream state.
    Status,
}

impl BotCommand {
    /// Parse `/start`, `/status@gtg_bot arg`, ... Anything else is `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let first = text.split_whitespace().next()?;
        let name = first.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        match name.to_ascii_lowercase().as_str() {
            "start" => Some(BotCommand::Start),
            "status" => Some(BotCommand::Status),
            _ => None,
        }
    }
}

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// A plain message registered a new target.
    AutoRegistered,
    /// A plain message that changed nothing.
    Ignored,
    /// A command was answered.
    Replied(BotCommand),
}

/// Route one inbound message.
pub async fn handle_inbound(
    ctx: &NotifierContext,
    message: &InboundMessage,
    live_state: LiveState,
) -> InboundOutcome {
    match BotCommand::parse(&message.text) {
        Some(BotCommand::Start) => {
            let reply = start_reply(ctx, message);
            send_reply(ctx, &message.chat_id, reply).await;
            InboundOutcome::Replied(BotCommand::Start)
        }
        Some(BotCommand::Status) => {
            let reply = status_reply(ctx, message, live_state);
            send_reply(ctx, &message.chat_id, reply).await;
            InboundOutcome::Replied(BotCommand::Status)
        }
        None => match ctx.registry.register_from_message(
            &message.chat_id,
            message.chat_kind,
            message.chat_title.clone(),
            false,
        ) {
            Ok(true) => InboundOutcome::AutoRegistered,
            Ok(false) => InboundOutcome::Ignored,
            Err(e) => {
                tracing::error!(target_id = %message.chat_id, "failed to auto-register chat: {}", e);
                InboundOutcome::Ignored
            }
        },
    }
}

fn start_reply(ctx: &NotifierContext, message: &InboundMessage) -> OutboundMessage {
    let name = ctx.entity.name(None);
    let text = match ctx.registry.register_from_message(
        &message.chat_id,
        message.chat_kind,
        message.chat_title.clone(),
        true,
    ) {
        Ok(true) => format!(
            "✅ Stream notifications enabled!\n\
             This chat will receive notifications when {} goes live.\n\
             Chat ID: {}",
            name, message.chat_id
        ),
        Ok(false) => format!(
            "✅ This chat is already registered for stream notifications.\nChat ID: {}",
            message.chat_id
        ),
        Err(e) => {
            tracing::error!(target_id = %message.chat_id, "failed to register chat: {}", e);
            "⚠️ Could not enable notifications right now. Please send /start again later."
                .to_string()
        }
    };
    OutboundMessage::plain(text)
}

fn status_reply(
    ctx: &NotifierContext,
    message: &InboundMessage,
    live_state: LiveState,
) -> OutboundMessage {
    OutboundMessage::plain(format!(
        "📊 Stream Notifier Status\n\
         Monitoring: {} (user ID {})\n\
         Stream: {}\n\
         Registered chats: {}\n\
         This chat ID: {}",
        ctx.entity.name(None),
        ctx.entity.id,
        live_state,
        ctx.registry.active_count(),
        message.chat_id
    ))
}

async fn send_reply(ctx: &NotifierContext, chat_id: &str, reply: OutboundMessage) {
    let result = ctx.channel.deliver(chat_id, &reply).await;
    if !result.ok {
        tracing::warn!(
            target_id = %chat_id,
            kind = %result.error_kind,
            detail = result.detail.as_deref().unwrap_or(""),
            "failed to answer command"
        );
    }
}
