//! Batched, idempotent file ingestion: one transaction per batch, upsert keyed on path.

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{Connection, params};

use crate::error::{ScanError, ScanResult};
use crate::pipeline::FileWalk;
use crate::{FileRecord, IngestStats};

use super::UPSERT_FILE_SQL;

/// Accumulates records and commits them in batches of `batch_size`.
///
/// Records still pending when the writer is dropped without [`finish`](Self::finish) are
/// discarded, so a walk that fails leaves only whole batches behind.
pub struct IngestWriter<'c> {
    conn: &'c mut Connection,
    connection_id: i64,
    batch_size: usize,
    batch: Vec<FileRecord>,
    stats: IngestStats,
    on_batch: Option<Box<dyn FnMut(&IngestStats) + 'c>>,
}

impl<'c> IngestWriter<'c> {
    pub fn new(conn: &'c mut Connection, connection_id: i64, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            conn,
            connection_id,
            batch_size,
            batch: Vec::with_capacity(batch_size),
            stats: IngestStats::default(),
            on_batch: None,
        }
    }

    /// Call `f` with running totals after every committed batch.
    pub fn on_batch(mut self, f: impl FnMut(&IngestStats) + 'c) -> Self {
        self.on_batch = Some(Box::new(f));
        self
    }

    /// Buffer one record; commits when the batch is full.
    pub fn push(&mut self, record: FileRecord) -> ScanResult<()> {
        self.batch.push(record);
        if self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Commit the remaining partial batch and return the totals.
    pub fn finish(mut self) -> ScanResult<IngestStats> {
        if !self.batch.is_empty() {
            self.flush()?;
        }
        Ok(self.stats)
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    fn flush(&mut self) -> ScanResult<()> {
        let n = flush_batch(self.conn, self.connection_id, &self.batch, Utc::now())?;
        self.batch.clear();
        self.stats.files += n;
        self.stats.batches += 1;
        debug!(
            "connection {}: committed batch {} ({n} files, {} total)",
            self.connection_id, self.stats.batches, self.stats.files
        );
        if let Some(cb) = self.on_batch.as_mut() {
            cb(&self.stats);
        }
        Ok(())
    }
}

/// Upsert a batch of records in a single transaction. Any failing record rolls the whole batch
/// back. Returns batch length.
fn flush_batch(
    conn: &mut Connection,
    connection_id: i64,
    batch: &[FileRecord],
    now: DateTime<Utc>,
) -> ScanResult<usize> {
    let tx = conn
        .transaction()
        .map_err(ScanError::persistence("begin batch"))?;
    {
        let mut stmt = tx
            .prepare_cached(UPSERT_FILE_SQL)
            .map_err(ScanError::persistence("prepare upsert"))?;
        for r in batch {
            stmt.execute(params![
                connection_id,
                r.path,
                r.name,
                r.size as i64,
                r.mod_time,
                now
            ])
            .map_err(ScanError::persistence("upsert file"))?;
        }
    }
    tx.commit().map_err(ScanError::persistence("commit batch"))?;
    Ok(batch.len())
}

/// Drive a whole walk into a writer, calling `on_batch` after every commit. A walk error aborts
/// before the pending partial batch is committed and is returned unchanged.
pub fn ingest(
    conn: &mut Connection,
    connection_id: i64,
    walk: FileWalk<'_>,
    batch_size: usize,
    on_batch: Option<&mut dyn FnMut(&IngestStats)>,
) -> ScanResult<IngestStats> {
    let mut writer = IngestWriter::new(conn, connection_id, batch_size);
    if let Some(cb) = on_batch {
        writer = writer.on_batch(move |stats| cb(stats));
    }
    for record in walk {
        writer.push(record?)?;
    }
    writer.finish()
}
