//! # gtg-notifier
//!
//! Core of the GTG stream notifier: watches one channel's live/offline
//! transitions and fans a notification out to every registered chat.
//!
//! Everything runs through one [`SubscriptionSupervisor`] loop. It keeps the
//! upstream subscriptions alive across renewals and reconnects, hands state
//! changes to the [`BroadcastDispatcher`], and feeds inbound chat messages
//! into target registration.
//!
//! ## Key components
//!
//! - [`SourceEvent`] / [`DomainEvent`] — what the upstream bridge delivers
//! - [`EventSource`] / [`JsonLinesSource`] — subscribe interface and the
//!   JSON-lines bridge implementation
//! - [`LiveState`] — online/offline machine that suppresses duplicates
//! - [`NotificationStrategy`] — single fixed chat vs. broadcast to the registry
//! - [`BroadcastDispatcher`] — one message per transition, per-target isolation,
//!   one prune per round
//! - [`SubscriptionSupervisor`] — subscription lifecycle and event routing
//! - [`NotifierContext`] — shared collaborators, created once at startup
//! - [`NotifierConfig`] — gtg.toml + environment overrides

pub mod commands;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod source;
pub mod state;
pub mod strategy;
pub mod supervisor;

#[cfg(test)]
mod test_support;

pub use commands::{handle_inbound, BotCommand, InboundOutcome};
pub use config::NotifierConfig;
pub use context::{MonitoredEntity, NotifierContext};
pub use dispatcher::BroadcastDispatcher;
pub use error::{ConfigError, SourceError};
pub use event::{ChatterRole, DomainEvent, SourceEvent, StateChange, StreamDetails, Topic};
pub use source::{EventSource, JsonLinesSource, SubscribeRequest};
pub use state::{LiveState, Transition};
pub use strategy::{escape_markdown, BroadcastReport, NotificationStrategy};
pub use supervisor::{Subscription, SubscriptionSupervisor, SupervisorConfig};
