use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::utils::config::DEFAULT_SEARCH_LIMIT;

/// PDF catalogue for local disks and SMB shares.
#[derive(Clone, Debug, Parser)]
#[command(name = "sokoni", version)]
#[command(about = "Index PDF files on local disks and SMB shares; search them by name.")]
pub struct Cli {
    /// Config file. Default: `sokoni.toml` in the working directory, when present.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// SQLite database file. Overrides config and `SOKONI_DB`.
    #[arg(long, short, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Verbose output.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// Re-scan due connections every period until Ctrl+C.
    Scheduler {
        /// Seconds between due checks. Overrides config and `SOKONI_SCAN_PERIOD_SECS`.
        #[arg(long, value_name = "SECS")]
        period: Option<u64>,
    },

    /// Scan one connection now, or list PDFs under a local directory without storing them.
    Scan(ScanArgs),

    /// Search stored files by name (case-insensitive substring).
    Search {
        query: String,

        /// Maximum rows to print.
        #[arg(long, short = 'n', default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Manage connections.
    #[command(subcommand)]
    Connection(ConnectionCommand),
}

#[derive(Clone, Debug, Args)]
pub struct ScanArgs {
    /// Connection id to scan into the catalogue.
    #[arg(value_name = "ID", conflicts_with = "root")]
    pub id: Option<i64>,

    /// Acting user id. Default from config (`user_id`).
    #[arg(long, value_name = "N")]
    pub user: Option<i64>,

    /// Local directory to list. Default: /mnt/share when no ID is given.
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ConnectionCommand {
    /// Register a connection.
    Add(ConnectionArgs),

    /// List your connections, newest first.
    List {
        #[arg(long)]
        json: bool,
    },

    /// Show one connection.
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },

    /// Replace a connection's fields.
    Update {
        id: i64,
        #[command(flatten)]
        fields: ConnectionArgs,
    },

    /// Delete a connection and its files.
    Delete { id: i64 },
}

#[derive(Clone, Debug, Args)]
pub struct ConnectionArgs {
    /// Display name.
    #[arg(long)]
    pub name: String,

    /// Local root, or `//server/share` for SMB.
    #[arg(long, value_name = "PATH")]
    pub base_path: String,

    /// Subdirectory under the base path.
    #[arg(long, value_name = "PATH", default_value = "")]
    pub remote_path: String,

    /// SMB user, optionally `DOMAIN\user`.
    #[arg(long)]
    pub username: Option<String>,

    /// Read the SMB password from SOKONI_SMB_PASSWORD or a hidden prompt.
    #[arg(long)]
    pub ask_password: bool,

    /// Free-form options, e.g. `domain=CORP`.
    #[arg(long)]
    pub options: Option<String>,

    /// Seconds between automatic scans. Default: one week.
    #[arg(long, value_name = "SECS")]
    pub scan_interval: Option<i64>,

    /// Enable or disable automatic scans.
    #[arg(long, value_name = "BOOL")]
    pub auto_scan: Option<bool>,
}
