// error.rs — Error types for the target registry.

use thiserror::Error;

/// Errors that can occur while persisting targets.
///
/// Reads never produce these: a missing or corrupt targets file is treated
/// as an empty registry. Only writes surface errors, and a failed write
/// leaves both the file and the in-memory view at their previous contents.
#[derive(Debug, Error)]
pub enum TargetError {
    /// A file I/O operation failed (disk full, permission denied, ...).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize the target list.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TargetError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        TargetError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
