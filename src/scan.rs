//! Scan entry points: one-shot local listing, and walking one connection into the catalogue.

use chrono::Utc;
use log::{debug, info};
use std::path::Path;

use crate::engine::auth::Authorizer;
use crate::engine::db_ops::{DbPool, ScanLease, get_connection, ingest};
use crate::error::ScanResult;
use crate::pipeline::{ScanTarget, classify, collect_files, local_walk, share_walk};
use crate::smb::{SmbCredentials, SmbSession};
use crate::{Connection, FileRecord, IngestStats, ScanSettings};

/// Every PDF under `root`, in traversal order. Touches no database.
pub fn collect_local(root: &Path) -> ScanResult<Vec<FileRecord>> {
    collect_files(local_walk(root))
}

/// Walk `connection`'s files into the catalogue under a scan lease.
///
/// Does not stamp `last_scan`; the scheduler owns cadence. `on_batch` sees running totals after
/// every committed batch.
pub fn scan_connection(
    pool: &DbPool,
    connection: &Connection,
    settings: &ScanSettings,
    on_batch: Option<&mut dyn FnMut(&IngestStats)>,
) -> ScanResult<IngestStats> {
    let target = classify(&connection.base_path, &connection.remote_path)?;
    let _lease = ScanLease::acquire(
        pool,
        connection.id,
        &settings.holder,
        settings.lease_ttl,
        Utc::now(),
    )?;
    // Declared after the lease so it is returned to the pool before the lease row is deleted.
    let mut db = pool.get()?;

    let stats = match target {
        ScanTarget::Local(root) => {
            info!(
                "connection {}: walking local root {}",
                connection.id,
                root.display()
            );
            ingest(
                &mut db,
                connection.id,
                local_walk(&root),
                settings.batch_size,
                on_batch,
            )?
        }
        ScanTarget::Smb(smb) => {
            info!("connection {}: walking {smb}", connection.id);
            let creds = SmbCredentials::from_connection(connection);
            let mut session = SmbSession::open(&smb, &creds, settings.smb_timeout)?;
            let walk = share_walk(&mut session, smb.display_root(), &smb.remote_path);
            ingest(&mut db, connection.id, walk, settings.batch_size, on_batch)?
        }
    };
    debug!(
        "connection {}: {} files in {} batches",
        connection.id, stats.files, stats.batches
    );
    Ok(stats)
}

/// On-demand scan of connection `id` on behalf of `user_id`.
pub fn scan_connection_by_id(
    pool: &DbPool,
    id: i64,
    user_id: i64,
    authorizer: &dyn Authorizer,
    settings: &ScanSettings,
    on_batch: Option<&mut dyn FnMut(&IngestStats)>,
) -> ScanResult<IngestStats> {
    let connection = {
        let db = pool.get()?;
        get_connection(&db, id)?
    };
    authorizer.authorize(user_id, &connection)?;
    scan_connection(pool, &connection, settings, on_batch)
}
