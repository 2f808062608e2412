//! Error kinds for the guide and subtitle engine

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Unparseable time token. The enclosing block is skipped.
    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),

    /// No recognizable structure at all in the top-level input.
    #[error("malformed source: {0}")]
    MalformedSource(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("unsupported subtitle format: {0}")]
    UnsupportedFormat(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
