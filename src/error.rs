// Startup resource errors shared by the config loader and the page table

use std::path::PathBuf;

/// A read-only input could not be loaded. Fatal at startup: no partial
/// config or page table is ever accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("Corrupt format: {0}")]
    CorruptFormat(String),

    #[error("Missing resource {}: {reason}", path.display())]
    MissingResource { path: PathBuf, reason: String },
}

impl LoadError {
    pub(crate) fn missing(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        LoadError::MissingResource {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}
