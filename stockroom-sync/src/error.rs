//! Error types for stockroom-sync.
//!
//! Only [`SyncError`] ever leaves a reconciliation run. [`RemoteError`] and
//! [`StoreError`] are raised by collaborators and caught at the entity
//! boundary, where they are folded into the run report.

use std::path::PathBuf;

use thiserror::Error;

use stockroom_core::{ConfigError, ManifestError};

/// Fatal errors: the run stops and nothing further is attempted.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Manifest load, validation or write-back failure.
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The relational store could not be opened.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Failures reported by the CDN or payment-catalog collaborators.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The addressed resource does not exist remotely.
    #[error("remote resource not found: {0}")]
    NotFound(String),

    /// Non-success HTTP status.
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// Connection, DNS, TLS or timeout failure.
    #[error("transport error calling {url}: {message}")]
    Transport { url: String, message: String },

    /// The response body did not have the expected shape.
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    /// Reading a local media file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The collaborator refused the request without a transport.
    #[error("remote rejected the request: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport { .. } => true,
            RemoteError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Failures reported by the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`RemoteError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RemoteError {
    RemoteError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        let status = |status| RemoteError::Status {
            status,
            url: "u".into(),
            body: String::new(),
        };
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!RemoteError::NotFound("x".into()).is_retryable());
    }
}
