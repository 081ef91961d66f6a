//! CLI command handlers: scheduler daemon, scans, search and connection management.

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info};
use std::path::PathBuf;

use crate::engine::arg_parser::{Cli, Commands, ConnectionArgs, ConnectionCommand, ScanArgs};
use crate::engine::auth::{Authorizer, OwnerOnly};
use crate::engine::db_ops::{
    DbPool, create_connection, delete_connection, get_connection, list_connections,
    search_files, update_connection,
};
use crate::engine::progress::{create_counter, on_batch_callback, refresh_bar};
use crate::scan::{collect_local, scan_connection_by_id};
use crate::scheduler::Scheduler;
use crate::utils::config::DEFAULT_ONE_SHOT_ROOT;
use crate::utils::{Settings, read_smb_password, setup_logging};
use crate::{Connection, ConnectionSpec, IngestStats, StoredFile};

/// Layer CLI flags over file and environment settings.
fn setup_settings(cli: &Cli) -> Settings {
    setup_logging(cli.verbose);
    let mut settings = Settings::load(cli.config.as_deref());
    if let Some(db) = &cli.db {
        settings.db_path = db.clone();
    }
    settings.verbose |= cli.verbose;
    debug!("{} settings: {:#?}", env!("CARGO_PKG_NAME"), settings);
    settings
}

fn open_pool(settings: &Settings) -> Result<DbPool> {
    DbPool::open(&settings.db_path, settings.pool_size)
        .with_context(|| format!("open database {}", settings.db_path.display()))
}

/// Dispatch one CLI invocation.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let settings = setup_settings(cli);
    match &cli.command {
        Commands::Scheduler { period } => handle_scheduler(&settings, *period),
        Commands::Scan(args) => handle_scan(&settings, args),
        Commands::Search { query, limit, json } => handle_search(&settings, query, *limit, *json),
        Commands::Connection(cmd) => handle_connection(&settings, cmd),
    }
}

fn handle_scheduler(settings: &Settings, period: Option<u64>) -> Result<()> {
    let pool = open_pool(settings)?;
    let period = period
        .filter(|secs| *secs > 0)
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| settings.scan_period());

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("install Ctrl+C handler")?;

    Scheduler::new(pool, settings.scan_settings("scheduler"), period).run(stop_rx);
    Ok(())
}

fn handle_scan(settings: &Settings, args: &ScanArgs) -> Result<()> {
    let Some(id) = args.id else {
        let root = args
            .root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ONE_SHOT_ROOT));
        let files = collect_local(&root).with_context(|| format!("scan {}", root.display()))?;
        println!("Found {} PDF files:", files.len());
        for f in &files {
            println!("- {} ({} bytes)", f.path, f.size);
        }
        return Ok(());
    };

    let user_id = args.user.unwrap_or(settings.user_id);
    let pool = open_pool(settings)?;
    let bar = settings.verbose.then(|| create_counter("Stored"));
    if let Some(pb) = &bar {
        refresh_bar(pb);
    }
    let mut observer = bar.as_ref().map(on_batch_callback);
    let stats = scan_connection_by_id(
        &pool,
        id,
        user_id,
        &OwnerOnly,
        &settings.scan_settings("cli"),
        observer
            .as_mut()
            .map(|f| f as &mut dyn FnMut(&IngestStats)),
    )
    .with_context(|| format!("scan connection {id}"))?;
    if bar.is_some() {
        eprintln!();
    }
    info!(
        "connection {id}: stored {} PDF files in {} batches",
        stats.files, stats.batches
    );
    println!("Stored {} PDF files from connection {id}", stats.files);
    Ok(())
}

fn handle_search(settings: &Settings, query: &str, limit: usize, json: bool) -> Result<()> {
    let pool = open_pool(settings)?;
    let db = pool.get()?;
    let files = search_files(&db, query, limit).context("search files")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
        return Ok(());
    }
    if files.is_empty() {
        println!("No files match {query:?}");
        return Ok(());
    }
    for f in &files {
        print_file(f);
    }
    Ok(())
}

fn print_file(f: &StoredFile) {
    println!(
        "{}\t{} bytes\t{}",
        f.path,
        f.size,
        f.mod_time.format("%Y-%m-%d %H:%M:%S")
    );
}

fn connection_spec(args: &ConnectionArgs) -> Result<ConnectionSpec> {
    let password = if args.ask_password {
        Some(read_smb_password(args.username.as_deref())?)
    } else {
        None
    };
    Ok(ConnectionSpec {
        name: args.name.clone(),
        base_path: args.base_path.clone(),
        remote_path: args.remote_path.clone(),
        username: args.username.clone(),
        password,
        options: args.options.clone(),
        scan_interval: args.scan_interval,
        auto_scan: args.auto_scan,
    })
}

fn print_connection(c: &Connection) {
    let location = if c.remote_path.is_empty() {
        c.base_path.clone()
    } else {
        format!("{} + {}", c.base_path, c.remote_path)
    };
    let last_scan = c
        .last_scan
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "{}\t{}\t{}\tauto_scan={}\tinterval={}s\tlast_scan={}",
        c.id, c.name, location, c.auto_scan, c.scan_interval, last_scan
    );
}

fn handle_connection(settings: &Settings, cmd: &ConnectionCommand) -> Result<()> {
    let pool = open_pool(settings)?;
    let db = pool.get()?;
    let user_id = settings.user_id;
    match cmd {
        ConnectionCommand::Add(args) => {
            let spec = connection_spec(args)?;
            let c = create_connection(&db, &spec, user_id, Utc::now())
                .context("create connection")?;
            println!("Created connection {} ({})", c.id, c.name);
        }
        ConnectionCommand::List { json } => {
            let list = list_connections(&db, user_id).context("list connections")?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else if list.is_empty() {
                println!("No connections");
            } else {
                list.iter().for_each(print_connection);
            }
        }
        ConnectionCommand::Show { id, json } => {
            let c = get_connection(&db, *id)
                .and_then(|c| OwnerOnly.authorize(user_id, &c).map(|()| c))
                .with_context(|| format!("show connection {id}"))?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&c)?);
            } else {
                print_connection(&c);
            }
        }
        ConnectionCommand::Update { id, fields } => {
            let spec = connection_spec(fields)?;
            let c = update_connection(&db, *id, user_id, &spec, Utc::now())
                .with_context(|| format!("update connection {id}"))?;
            println!("Updated connection {} ({})", c.id, c.name);
        }
        ConnectionCommand::Delete { id } => {
            delete_connection(&db, *id, user_id)
                .with_context(|| format!("delete connection {id}"))?;
            println!("Deleted connection {id}");
        }
    }
    Ok(())
}
