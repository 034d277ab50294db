//! Typed errors for the harvester library.
//!
//! The session and store layers expose `thiserror` enums; orchestration code
//! wraps them in `anyhow` with context at each boundary. Element-wait
//! timeouts are not errors at all, they surface as `WaitOutcome::TimedOut`.

use thiserror::Error;

/// Errors raised by the browser-automation surface.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Browser could not be launched or attached
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// Navigation to a URL failed at the protocol level
    #[error("navigation to {url} failed: {source}")]
    Navigation {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A protocol command failed
    #[error("browser command failed: {0}")]
    Command(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Local filesystem work for a download failed
    #[error("download io error: {0}")]
    DownloadIo(#[from] std::io::Error),

    /// The page or browser is gone
    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Wraps an arbitrary driver error as a command failure.
    pub fn command<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SessionError::Command(Box::new(source))
    }
}

/// Errors raised by the tender store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Child collections could not be encoded for the JSON columns
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
