use std::path::PathBuf;
use thiserror::Error;

/// Why a telemetry source produced nothing. Aggregators absorb these into
/// empty defaults; they never reach an HTTP response.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected shape in {source_name}: {detail}")]
    ShapeMismatch { source_name: String, detail: String },

    #[error("I/O error on {}: {error}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("invalid JSON in {}: {error}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        error: serde_json::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl SourceError {
    pub fn shape(source_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            source_name: source_name.into(),
            detail: detail.into(),
        }
    }

    /// Missing files are the normal state for optional sources and only worth a debug line.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { error, .. } if error.kind() == std::io::ErrorKind::NotFound)
    }
}
