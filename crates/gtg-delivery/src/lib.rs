//! # gtg-delivery
//!
//! Delivery adapters for the GTG stream notifier.
//!
//! A [`DeliveryChannel`] sends one message to one target and reports how it
//! went. The report matters as much as the send: a permanently unreachable
//! target (bot blocked, chat deleted) gets pruned from the registry, while a
//! transient failure (rate limit, network) is only logged.
//!
//! ## Key components
//!
//! - [`DeliveryChannel`] — async trait implemented by every chat transport
//! - [`DeliveryResult`] / [`DeliveryErrorKind`] — per-target outcome
//! - [`classify_failure`] — maps transport errors onto the outcome taxonomy
//! - [`TelegramChannel`] — Telegram Bot API adapter (send + inbound polling)
//! - [`DesktopNotifier`] — best-effort local toast notifications

pub mod channel;
pub mod desktop;
pub mod error;
pub mod telegram;

pub use channel::{
    classify_failure, DeliveryChannel, DeliveryErrorKind, DeliveryResult, InboundMessage,
    MessageFormat, OutboundMessage,
};
pub use desktop::{DesktopNotifier, NotifySend, NullNotifier, Urgency};
pub use error::DeliveryError;
pub use telegram::{BotIdentity, TelegramChannel};
