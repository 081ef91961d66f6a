//! Sokoni CLI: scheduler daemon, scans, search and connection management.

use anyhow::Result;
use clap::Parser;
use sokoni::engine::arg_parser::Cli;
use sokoni::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
