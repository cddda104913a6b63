//! Error taxonomy for provenance extraction and report publication.

use std::path::PathBuf;

/// Errors produced while reading repository metadata from disk.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("no .git directory found above {start}")]
    NotARepository { start: PathBuf },

    #[error("remote \"origin\" url not found in {config}")]
    RemoteNotFound { config: PathBuf },

    #[error("HEAD could not be resolved: {0}")]
    HeadUnreadable(String),

    #[error("git {args} failed: {stderr}")]
    CommandFailed { args: String, stderr: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while resolving a remote URL into a repository id.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("unable to parse repository remote: {0}")]
    UnparsableRemote(String),

    #[error("repository lookup failed (HTTP {status}): {body}")]
    LookupFailed { status: u16, body: String },

    #[error("repository lookup request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors produced by the report publisher and its brokers.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("publisher mailbox closed")]
    Closed,
}

impl From<lapin::Error> for PublishError {
    fn from(err: lapin::Error) -> Self {
        PublishError::Publish(err.to_string())
    }
}
