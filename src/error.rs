//! Error taxonomy for the scan-and-ingest pipeline.
//!
//! Walker, SMB and ingest failures are distinguishable by variant so callers (the scheduler in
//! particular) can report which phase of a connection's scan failed.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for the scan pipeline.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid SMB path spec {spec:?}: {reason}")]
    InvalidPathSpec { spec: String, reason: &'static str },

    #[error("cannot reach SMB server {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SMB authentication failed for user {user:?}: {details}")]
    Auth { user: String, details: String },

    #[error("cannot mount share {share}: {details}")]
    Mount { share: String, details: String },

    #[error("cannot read remote directory {path:?}: {details}")]
    Traversal { path: String, details: String },

    #[error("SMB negotiation with {addr} failed: {details}")]
    Negotiate { addr: String, details: String },

    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error ({context}): {source}")]
    Persistence {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("timed out waiting {waited_secs}s for a database connection")]
    PoolTimeout { waited_secs: u64 },

    #[error("connection {connection_id} not found")]
    Authorization { connection_id: i64 },

    #[error("connection {connection_id} not found")]
    NotFound { connection_id: i64 },

    #[error("invalid input: {details}")]
    Validation { details: String },

    #[error("connection {connection_id} is already being scanned by {holder}")]
    ScanInProgress { connection_id: i64, holder: String },
}

impl ScanError {
    /// Short label for the phase that failed, used in scheduler log lines.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::InvalidPathSpec { .. } => "path",
            Self::Connection { .. } => "connect",
            Self::Negotiate { .. } => "negotiate",
            Self::Auth { .. } => "auth",
            Self::Mount { .. } => "mount",
            Self::Traversal { .. } => "traverse",
            Self::Filesystem { .. } => "walk",
            Self::Persistence { .. } | Self::PoolTimeout { .. } => "persist",
            Self::Authorization { .. } | Self::NotFound { .. } => "lookup",
            Self::Validation { .. } => "validate",
            Self::ScanInProgress { .. } => "lease",
        }
    }

    /// True for errors the API boundary reports as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Authorization { .. } | Self::NotFound { .. })
    }

    pub(crate) fn persistence(context: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Persistence { context, source }
    }
}
