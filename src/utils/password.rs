//! SMB password input for `connection add/update --ask-password`: env var → secure prompt.

use anyhow::{Context, Result};
use colored::Colorize;
use log::info;

use crate::utils::config::PackagePaths;

fn try_env() -> Option<String> {
    let key = PackagePaths::get().env_var("SMB_PASSWORD");
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Read the SMB password for `username`: `SOKONI_SMB_PASSWORD` (also from `.env`) → secure prompt.
pub fn read_smb_password(username: Option<&str>) -> Result<String> {
    if let Some(s) = try_env() {
        info!("SMB password found in environment");
        return Ok(s);
    }
    let label = format!("[{}]", env!("CARGO_PKG_NAME")).cyan().bold();
    let who = username.unwrap_or("guest");
    let pass = rpassword::prompt_password(format!("{} SMB password for {}: ", label, who))
        .context("read SMB password")?;
    Ok(pass.trim_end_matches(['\r', '\n']).to_string())
}
