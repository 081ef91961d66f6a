//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived file names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    db_filename: String,
    config_filename: String,
    env_prefix: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                db_filename: format!("{pkg}.db"),
                config_filename: format!("{pkg}.toml"),
                env_prefix: pkg.to_uppercase(),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Default database file (relative to the working directory).
    pub fn db_filename(&self) -> &str {
        &self.db_filename
    }

    /// Config file looked up in the working directory when `--config` is not given.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Environment variable name for `key`, e.g. `SOKONI_DB`.
    pub fn env_var(&self, key: &str) -> String {
        format!("{}_{}", self.env_prefix, key)
    }
}

// ---- Scanning ----

/// Records per ingest transaction (ScanBatch size).
pub const INGEST_BATCH_SIZE: usize = 100;

/// Default `connections.scan_interval`: one week.
pub const DEFAULT_SCAN_INTERVAL_SECS: i64 = 604_800;

/// How often the scheduler re-checks for due connections.
pub const SCHEDULER_PERIOD: Duration = Duration::from_secs(6 * 60 * 60);

/// Root used by `scan` without a connection id.
pub const DEFAULT_ONE_SHOT_ROOT: &str = "/mnt/share";

/// A scan lease older than this is treated as left behind by a dead process.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// ---- SMB ----

/// SMB over Direct TCP.
pub const SMB_PORT: u16 = 445;

/// Connect and per-read timeout for SMB sockets.
pub const DEFAULT_SMB_TIMEOUT: Duration = Duration::from_secs(30);

/// Output buffer requested per QUERY_DIRECTORY round-trip (capped by the server's max transact size).
pub const SMB_QUERY_BUFFER: u32 = 64 * 1024;

// ---- Database ----

/// Connections kept by [`DbPool`](crate::engine::db_ops::DbPool).
pub const DEFAULT_POOL_SIZE: usize = 4;

/// How long `DbPool::get` waits for an idle connection.
pub const POOL_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite busy timeout per connection (scheduler and CLI may write at once).
pub const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default row cap for `search`.
pub const DEFAULT_SEARCH_LIMIT: usize = 100;

/// Acting user for CLI operations until real authentication exists.
pub const DEFAULT_CLI_USER_ID: i64 = -1;
