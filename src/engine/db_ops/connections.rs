//! Connection repository: CRUD scoped to the owning user, plus the scheduler's due query.

use chrono::{DateTime, Utc};
use rusqlite::{Connection as Db, OptionalExtension, Row, params};

use crate::error::{ScanError, ScanResult};
use crate::pipeline::classify;
use crate::{Connection, ConnectionSpec};

const COLUMNS: &str = "id, name, base_path, remote_path, username, password, options, user_id, \
                       last_scan, scan_interval, auto_scan, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Connection> {
    Ok(Connection {
        id: row.get(0)?,
        name: row.get(1)?,
        base_path: row.get(2)?,
        remote_path: row.get(3)?,
        username: row.get(4)?,
        password: row.get(5)?,
        options: row.get(6)?,
        user_id: row.get(7)?,
        last_scan: row.get(8)?,
        scan_interval: row.get(9)?,
        auto_scan: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn validate(spec: &ConnectionSpec) -> ScanResult<()> {
    if spec.name.trim().is_empty() {
        return Err(ScanError::Validation {
            details: "name is required".into(),
        });
    }
    if spec.base_path.trim().is_empty() && spec.remote_path.trim().is_empty() {
        return Err(ScanError::Validation {
            details: "base_path is required".into(),
        });
    }
    if let Some(secs) = spec.scan_interval
        && secs <= 0
    {
        return Err(ScanError::Validation {
            details: format!("scan_interval must be positive, got {secs}"),
        });
    }
    classify(&spec.base_path, &spec.remote_path)?;
    Ok(())
}

/// Insert a connection owned by `user_id`. Interval defaults to a week and auto-scan to on.
pub fn create_connection(
    db: &Db,
    spec: &ConnectionSpec,
    user_id: i64,
    now: DateTime<Utc>,
) -> ScanResult<Connection> {
    validate(spec)?;
    db.execute(
        "INSERT INTO connections (name, base_path, remote_path, username, password, options, \
         user_id, scan_interval, auto_scan, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            spec.name.trim(),
            spec.base_path.trim(),
            spec.remote_path.trim(),
            spec.username,
            spec.password,
            spec.options,
            user_id,
            spec.scan_interval_or_default(),
            spec.auto_scan.unwrap_or(true),
            now
        ],
    )
    .map_err(ScanError::persistence("insert connection"))?;
    get_connection(db, db.last_insert_rowid())
}

pub fn get_connection(db: &Db, id: i64) -> ScanResult<Connection> {
    db.query_row(
        &format!("SELECT {COLUMNS} FROM connections WHERE id = ?1"),
        [id],
        from_row,
    )
    .optional()
    .map_err(ScanError::persistence("load connection"))?
    .ok_or(ScanError::NotFound { connection_id: id })
}

fn get_owned(db: &Db, id: i64, user_id: i64) -> ScanResult<Connection> {
    db.query_row(
        &format!("SELECT {COLUMNS} FROM connections WHERE id = ?1 AND user_id = ?2"),
        [id, user_id],
        from_row,
    )
    .optional()
    .map_err(ScanError::persistence("load connection"))?
    .ok_or(ScanError::NotFound { connection_id: id })
}

/// Connections owned by `user_id`, newest first.
pub fn list_connections(db: &Db, user_id: i64) -> ScanResult<Vec<Connection>> {
    let mut stmt = db
        .prepare(&format!(
            "SELECT {COLUMNS} FROM connections WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
        ))
        .map_err(ScanError::persistence("prepare list connections"))?;
    let rows = stmt
        .query_map([user_id], from_row)
        .map_err(ScanError::persistence("list connections"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(ScanError::persistence("read connection row"))
}

/// Replace name, paths and credentials. Unset interval/auto-scan and an unset password keep
/// their stored values.
pub fn update_connection(
    db: &Db,
    id: i64,
    user_id: i64,
    spec: &ConnectionSpec,
    now: DateTime<Utc>,
) -> ScanResult<Connection> {
    validate(spec)?;
    let current = get_owned(db, id, user_id)?;
    db.execute(
        "UPDATE connections SET name = ?2, base_path = ?3, remote_path = ?4, username = ?5, \
         password = ?6, options = ?7, scan_interval = ?8, auto_scan = ?9, updated_at = ?10 \
         WHERE id = ?1",
        params![
            id,
            spec.name.trim(),
            spec.base_path.trim(),
            spec.remote_path.trim(),
            spec.username,
            spec.password.as_ref().or(current.password.as_ref()),
            spec.options,
            spec.scan_interval.unwrap_or(current.scan_interval),
            spec.auto_scan.unwrap_or(current.auto_scan),
            now
        ],
    )
    .map_err(ScanError::persistence("update connection"))?;
    get_connection(db, id)
}

/// Delete a connection and, through the foreign key, its files.
pub fn delete_connection(db: &Db, id: i64, user_id: i64) -> ScanResult<()> {
    let n = db
        .execute(
            "DELETE FROM connections WHERE id = ?1 AND user_id = ?2",
            [id, user_id],
        )
        .map_err(ScanError::persistence("delete connection"))?;
    if n == 0 {
        return Err(ScanError::NotFound { connection_id: id });
    }
    Ok(())
}

/// Connections with auto-scan on that were never scanned or whose interval has elapsed, by id.
pub fn due_connections(db: &Db, now: DateTime<Utc>) -> ScanResult<Vec<Connection>> {
    // SQL narrows with second tolerance; `Connection::is_due` settles the exact boundary.
    let mut stmt = db
        .prepare(&format!(
            "SELECT {COLUMNS} FROM connections \
             WHERE auto_scan = 1 \
               AND (last_scan IS NULL \
                    OR julianday(last_scan) + scan_interval / 86400.0 <= julianday(?1) + 1.0 / 86400.0) \
             ORDER BY id"
        ))
        .map_err(ScanError::persistence("prepare due query"))?;
    let rows = stmt
        .query_map([now], from_row)
        .map_err(ScanError::persistence("query due connections"))?;
    let candidates = rows
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(ScanError::persistence("read connection row"))?;
    Ok(candidates.into_iter().filter(|c| c.is_due(now)).collect())
}

/// Stamp a successful scan.
pub fn mark_scanned(db: &Db, id: i64, now: DateTime<Utc>) -> ScanResult<()> {
    let n = db
        .execute(
            "UPDATE connections SET last_scan = ?2, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )
        .map_err(ScanError::persistence("mark scanned"))?;
    if n == 0 {
        return Err(ScanError::NotFound { connection_id: id });
    }
    Ok(())
}
