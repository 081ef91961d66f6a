//! Runtime settings: defaults, then `sokoni.toml`, then environment (`.env` honored), then CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ScanSettings;
use crate::utils::config::{
    DEFAULT_CLI_USER_ID, DEFAULT_LEASE_TTL, DEFAULT_POOL_SIZE, DEFAULT_SMB_TIMEOUT,
    INGEST_BATCH_SIZE, PackagePaths, SCHEDULER_PERIOD,
};
use crate::utils::sokoni_toml::{apply_file_to_settings, load_sokoni_toml};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Pooled database connections.
    pub pool_size: usize,
    /// Records per ingest transaction.
    pub batch_size: usize,
    /// Scheduler re-check period in seconds.
    pub scan_period_secs: u64,
    pub smb_timeout_secs: u64,
    pub lease_ttl_secs: u64,
    /// Acting user for CLI operations.
    pub user_id: i64,
    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(PackagePaths::get().db_filename()),
            pool_size: DEFAULT_POOL_SIZE,
            batch_size: INGEST_BATCH_SIZE,
            scan_period_secs: SCHEDULER_PERIOD.as_secs(),
            smb_timeout_secs: DEFAULT_SMB_TIMEOUT.as_secs(),
            lease_ttl_secs: DEFAULT_LEASE_TTL.as_secs(),
            user_id: DEFAULT_CLI_USER_ID,
            verbose: false,
        }
    }
}

impl Settings {
    /// Defaults overlaid with the config file (explicit path, else `sokoni.toml` in the working
    /// directory) and then the environment.
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut settings = Self::default();
        let default_path = PathBuf::from(PackagePaths::get().config_filename());
        let path = config_path.unwrap_or(&default_path);
        match load_sokoni_toml(path) {
            Some(file) => apply_file_to_settings(&file, &mut settings),
            None if config_path.is_some() => {
                log::warn!("config file {} not loaded", path.display());
            }
            None => {}
        }
        let _ = dotenvy::dotenv();
        settings.apply_env();
        settings
    }

    /// Apply `SOKONI_DB` and `SOKONI_SCAN_PERIOD_SECS` when set.
    pub fn apply_env(&mut self) {
        let paths = PackagePaths::get();
        if let Ok(db) = std::env::var(paths.env_var("DB"))
            && !db.trim().is_empty()
        {
            self.db_path = PathBuf::from(db.trim());
        }
        if let Ok(secs) = std::env::var(paths.env_var("SCAN_PERIOD_SECS")) {
            match secs.trim().parse::<u64>() {
                Ok(v) if v > 0 => self.scan_period_secs = v,
                _ => log::warn!("ignoring invalid scan period {secs:?}"),
            }
        }
    }

    pub fn scan_period(&self) -> Duration {
        Duration::from_secs(self.scan_period_secs.max(1))
    }

    /// Per-scan knobs derived from these settings.
    pub fn scan_settings(&self, holder: &str) -> ScanSettings {
        ScanSettings {
            batch_size: self.batch_size.max(1),
            smb_timeout: Duration::from_secs(self.smb_timeout_secs.max(1)),
            lease_ttl: Duration::from_secs(self.lease_ttl_secs),
            holder: holder.to_string(),
        }
    }
}
