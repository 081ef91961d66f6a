//! Public types shared by the walker, the ingest writer and the repositories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::config::{
    DEFAULT_LEASE_TTL, DEFAULT_SCAN_INTERVAL_SECS, DEFAULT_SMB_TIMEOUT, INGEST_BATCH_SIZE,
};

/// One discovered PDF, as produced by the walker and consumed by the ingest writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    /// Full path: local absolute path, or `//server/share/dir/file.pdf` for SMB.
    pub path: String,
    /// File name only.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time reported by the source filesystem.
    pub mod_time: DateTime<Utc>,
}

/// A row of the `files` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub connection_id: i64,
    pub path: String,
    pub name: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

/// A scan target: root location, credentials and cadence (row of `connections`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub id: i64,
    pub name: String,
    /// Local root, or `//server/share` for SMB.
    pub base_path: String,
    /// Subpath under `base_path` (or a legacy combined `//server/share/dir` spec).
    pub remote_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scan: Option<DateTime<Utc>>,
    /// Seconds between automatic scans (always > 0).
    pub scan_interval: i64,
    pub auto_scan: bool,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// True when the scheduler should pick this connection up at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.auto_scan {
            return false;
        }
        match self.last_scan {
            None => true,
            Some(last) => last + chrono::Duration::seconds(self.scan_interval) < now,
        }
    }
}

/// Fields a caller supplies to create or update a connection.
///
/// `scan_interval`/`auto_scan` left as `None` take the defaults on create and keep the stored
/// value on update.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConnectionSpec {
    pub name: String,
    pub base_path: String,
    #[serde(default)]
    pub remote_path: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub options: Option<String>,
    pub scan_interval: Option<i64>,
    pub auto_scan: Option<bool>,
}

impl ConnectionSpec {
    pub fn scan_interval_or_default(&self) -> i64 {
        self.scan_interval.unwrap_or(DEFAULT_SCAN_INTERVAL_SECS)
    }
}

/// Counters reported by the ingest writer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Records committed.
    pub files: usize,
    /// Batches committed.
    pub batches: usize,
}

/// Knobs for one connection scan (shared by scheduler, on-demand and CLI scans).
#[derive(Clone, Debug)]
pub struct ScanSettings {
    /// Records per committed batch.
    pub batch_size: usize,
    /// TCP connect/read timeout for SMB.
    pub smb_timeout: Duration,
    /// Age after which a scan lease is treated as abandoned.
    pub lease_ttl: Duration,
    /// Name written into the lease row (e.g. `scheduler`, `cli`).
    pub holder: String,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            batch_size: INGEST_BATCH_SIZE,
            smb_timeout: DEFAULT_SMB_TIMEOUT,
            lease_ttl: DEFAULT_LEASE_TTL,
            holder: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

impl ScanSettings {
    /// Same settings with a different lease holder name.
    pub fn with_holder(&self, holder: &str) -> Self {
        Self {
            holder: holder.to_string(),
            ..self.clone()
        }
    }
}
