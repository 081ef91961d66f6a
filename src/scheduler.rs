//! Due-connection scheduler: a due check at startup, then one every period, until stopped.
//!
//! Connections are scanned one at a time in id order. A stop request is honored between
//! connections, never in the middle of one.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, select, tick};
use log::{error, info, warn};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::ScanSettings;
use crate::engine::db_ops::{DbPool, due_connections, mark_scanned};
use crate::error::{ScanError, ScanResult};
use crate::scan::scan_connection;

/// Outcome of one pass over the due set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Connections the due query returned.
    pub due: usize,
    /// Scanned and stamped.
    pub scanned: usize,
    /// Scan failed; left due for the next tick.
    pub failed: usize,
    /// Leased by another scan.
    pub skipped: usize,
    /// A stop request cut the pass short.
    pub stopped: bool,
}

pub struct Scheduler {
    pool: DbPool,
    settings: ScanSettings,
    period: Duration,
}

impl Scheduler {
    pub fn new(pool: DbPool, settings: ScanSettings, period: Duration) -> Self {
        Self {
            pool,
            settings,
            period,
        }
    }

    /// Block until a message arrives on `stop` or its sender is dropped.
    pub fn run(&self, stop: Receiver<()>) {
        info!(
            "scheduler started: checking every {}s",
            self.period.as_secs()
        );
        let ticker = tick(self.period);
        let mut stopped = self.tick(&stop);
        while !stopped {
            select! {
                recv(stop) -> _ => stopped = true,
                recv(ticker) -> _ => stopped = self.tick(&stop),
            }
        }
        info!("scheduler stopped");
    }

    /// Run on a background thread.
    pub fn spawn(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = bounded(1);
        let join = thread::spawn(move || self.run(stop_rx));
        SchedulerHandle { stop_tx, join }
    }

    /// Returns true when the pass ended on a stop request.
    fn tick(&self, stop: &Receiver<()>) -> bool {
        match self.scan_due_connections(Utc::now(), stop) {
            Ok(report) => report.stopped,
            Err(e) => {
                error!("due check failed: {e}");
                false
            }
        }
    }

    /// One pass: scan every connection due at `now`, stamping `last_scan` on success only.
    pub fn scan_due_connections(
        &self,
        now: DateTime<Utc>,
        stop: &Receiver<()>,
    ) -> ScanResult<TickReport> {
        let due = {
            let db = self.pool.get()?;
            due_connections(&db, now)?
        };
        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };
        if due.is_empty() {
            info!("no connections due");
            return Ok(report);
        }
        info!("{} connection(s) due", due.len());

        for (i, connection) in due.iter().enumerate() {
            if stop_requested(stop) {
                info!(
                    "stop requested; {} connection(s) left for the next run",
                    due.len() - i
                );
                report.stopped = true;
                break;
            }
            info!("scanning connection {} ({})", connection.id, connection.name);
            match scan_connection(&self.pool, connection, &self.settings, None)
                .and_then(|stats| self.stamp(connection.id).map(|()| stats))
            {
                Ok(stats) => {
                    report.scanned += 1;
                    info!(
                        "connection {} ({}) done: {} files",
                        connection.id, connection.name, stats.files
                    );
                }
                Err(ScanError::ScanInProgress { holder, .. }) => {
                    report.skipped += 1;
                    warn!(
                        "connection {} ({}) skipped: scan already running in {holder}",
                        connection.id, connection.name
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "connection {} ({}) failed during {}: {e}",
                        connection.id,
                        connection.name,
                        e.phase()
                    );
                }
            }
        }
        Ok(report)
    }

    fn stamp(&self, connection_id: i64) -> ScanResult<()> {
        let db = self.pool.get()?;
        mark_scanned(&db, connection_id, Utc::now())
    }
}

fn stop_requested(stop: &Receiver<()>) -> bool {
    matches!(stop.try_recv(), Ok(()) | Err(TryRecvError::Disconnected))
}

/// Background scheduler thread.
pub struct SchedulerHandle {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ask the scheduler to stop and wait for the in-flight connection to finish.
    pub fn stop(self) -> thread::Result<()> {
        let _ = self.stop_tx.try_send(());
        self.join.join()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
