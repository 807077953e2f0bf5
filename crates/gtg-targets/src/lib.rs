//! # gtg-targets
//!
//! Persistent registry of notification targets for the GTG stream notifier.
//!
//! A [`Target`] is a chat that has opted into (or was auto-registered for)
//! live-stream notifications. Targets are discovered at runtime, so the set
//! changes while the notifier is running and every change is flushed to disk
//! before it becomes visible.
//!
//! ## Key components
//!
//! - [`Target`] / [`TargetKind`] — one delivery destination (group or direct chat)
//! - [`TargetStore`] — JSON file persistence with atomic replace on every write
//! - [`TargetRegistry`] — policy-aware view over the store (registration rules,
//!   broadcast filtering, bulk pruning)
//! - [`TargetError`] — storage failures surfaced to callers

pub mod error;
pub mod registry;
pub mod store;
pub mod target;

pub use error::TargetError;
pub use registry::{RegistrationPolicy, TargetRegistry};
pub use store::{TargetSnapshot, TargetStore};
pub use target::{Target, TargetKind};
