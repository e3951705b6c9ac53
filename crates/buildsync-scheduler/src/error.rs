//! Synchronization errors.

use buildsync_config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A request reached a builder its configuration cannot serve.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Load(#[from] ConfigError),

    #[error("remote request failed: {0}")]
    Remote(String),

    #[error("unexpected response from remote: {0}")]
    Protocol(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl SyncError {
    /// Whether the error points at a broken configuration rather than a
    /// transient remote problem. Fatal errors must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Config(_) | SyncError::Load(_))
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
