// error.rs — Error types for the notifier core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the upstream event source.
///
/// None of these are fatal to the notifier: a failed subscription is retried
/// on the next supervisor tick, and a lost session triggers a full
/// resubscribe once a new one arrives.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Talking to the bridge process failed.
    #[error("event source I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request or event could not be (de)serialized.
    #[error("event source serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The source has no live session to subscribe against.
    #[error("event source is closed")]
    Closed,

    /// The upstream refused the subscription.
    #[error("subscription rejected: {0}")]
    Rejected(String),
}

/// Errors while loading notifier configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// One or more required settings are absent.
    #[error("missing required settings: {}", .0.join(", "))]
    Missing(Vec<String>),
}
