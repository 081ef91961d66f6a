//! Advisory per-connection scan lock stored in `scan_leases`, so it holds across processes.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use std::time::Duration;

use crate::error::{ScanError, ScanResult};

use super::DbPool;

/// Held while one connection is being scanned. Dropping it deletes the lease row.
#[derive(Debug)]
pub struct ScanLease {
    pool: DbPool,
    connection_id: i64,
    holder: String,
    acquired_at: DateTime<Utc>,
    released: bool,
}

impl ScanLease {
    /// Take the lease for `connection_id`. A live lease held elsewhere fails with
    /// `ScanInProgress`; one older than `ttl` is taken over.
    pub fn acquire(
        pool: &DbPool,
        connection_id: i64,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> ScanResult<Self> {
        let mut conn = pool.get()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(ScanError::persistence("begin lease"))?;
        let existing: Option<(String, DateTime<Utc>)> = tx
            .query_row(
                "SELECT holder, acquired_at FROM scan_leases WHERE connection_id = ?1",
                [connection_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(ScanError::persistence("read lease"))?;

        if let Some((current, at)) = existing {
            let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
            if at.checked_add_signed(ttl).is_none_or(|expires| expires > now) {
                return Err(ScanError::ScanInProgress {
                    connection_id,
                    holder: current,
                });
            }
            warn!(
                "connection {connection_id}: taking over stale scan lease held by {current} since {at}"
            );
        }

        tx.execute(
            "INSERT OR REPLACE INTO scan_leases (connection_id, holder, acquired_at) \
             VALUES (?1, ?2, ?3)",
            params![connection_id, holder, now],
        )
        .map_err(ScanError::persistence("write lease"))?;
        tx.commit().map_err(ScanError::persistence("commit lease"))?;
        debug!("connection {connection_id}: lease acquired by {holder}");

        Ok(Self {
            pool: pool.clone(),
            connection_id,
            holder: holder.to_string(),
            acquired_at: now,
            released: false,
        })
    }

    pub fn connection_id(&self) -> i64 {
        self.connection_id
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Delete the lease row now and report failures instead of logging them.
    pub fn release(mut self) -> ScanResult<()> {
        self.released = true;
        self.delete_row()
    }

    /// Only deletes our own row; a lease taken over by someone else stays.
    fn delete_row(&self) -> ScanResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM scan_leases WHERE connection_id = ?1 AND holder = ?2 AND acquired_at = ?3",
            params![self.connection_id, self.holder, self.acquired_at],
        )
        .map_err(ScanError::persistence("delete lease"))?;
        Ok(())
    }
}

impl Drop for ScanLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.delete_row() {
            warn!(
                "connection {}: failed to release scan lease: {e}",
                self.connection_id
            );
        }
    }
}
