//! Load `sokoni.toml` (CLI and daemon). Library callers build [`Settings`] themselves.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::utils::settings::Settings;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SokoniToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    db_path: Option<String>,
    pool_size: Option<usize>,
    batch_size: Option<usize>,
    scan_period_secs: Option<u64>,
    smb_timeout_secs: Option<u64>,
    lease_ttl_secs: Option<u64>,
    user_id: Option<i64>,
    verbose: Option<bool>,
}

/// Load the config file at `path`. Returns None if the file is missing; a file that fails to
/// parse is logged and ignored.
pub(crate) fn load_sokoni_toml(path: &Path) -> Option<SokoniToml> {
    let s = std::fs::read_to_string(path).ok()?;
    toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite settings field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $settings:expr, $sec_field:ident => $settings_field:ident) => {
        if let Some(v) = $sec.$sec_field {
            $settings.$settings_field = v;
        }
    };
}

/// Apply file config to settings (only fields present in the file). Call before env and CLI.
pub(crate) fn apply_file_to_settings(file: &SokoniToml, settings: &mut Settings) {
    let sec = &file.settings;
    if let Some(ref p) = sec.db_path {
        settings.db_path = PathBuf::from(p);
    }
    apply_file_opt!(sec, settings, pool_size => pool_size);
    apply_file_opt!(sec, settings, batch_size => batch_size);
    apply_file_opt!(sec, settings, scan_period_secs => scan_period_secs);
    apply_file_opt!(sec, settings, smb_timeout_secs => smb_timeout_secs);
    apply_file_opt!(sec, settings, lease_ttl_secs => lease_ttl_secs);
    apply_file_opt!(sec, settings, user_id => user_id);
    apply_file_opt!(sec, settings, verbose => verbose);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let file: SokoniToml = toml::from_str(
            r#"
            [settings]
            db_path = "/var/lib/sokoni/index.db"
            batch_size = 250
            scan_period_secs = 60
            "#,
        )
        .unwrap();
        let mut settings = Settings::default();
        apply_file_to_settings(&file, &mut settings);
        assert_eq!(settings.db_path, PathBuf::from("/var/lib/sokoni/index.db"));
        assert_eq!(settings.batch_size, 250);
        assert_eq!(settings.scan_period_secs, 60);
        assert_eq!(settings.pool_size, Settings::default().pool_size);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_sokoni_toml(&dir.path().join("sokoni.toml")).is_none());
    }

    #[test]
    fn unparsable_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sokoni.toml");
        std::fs::write(&path, "[settings\nbatch_size = ").unwrap();
        assert!(load_sokoni_toml(&path).is_none());
    }
}
