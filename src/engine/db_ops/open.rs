//! Open the catalogue database with WAL, per-connection pragmas and the schema.

use rusqlite::Connection;
use std::path::Path;

use crate::error::{ScanError, ScanResult};
use crate::utils::config::SQLITE_BUSY_TIMEOUT;

use super::{SCHEMA, WAL_PRAGMAS};

/// Enable WAL and apply schema to an open connection (idempotent).
fn apply_wal_and_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    conn.execute_batch(WAL_PRAGMAS)?;
    conn.execute_batch(SCHEMA)
}

/// Pragmas every connection needs regardless of who opened the file first.
fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(SQLITE_BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", true)
}

/// Open or create the database and ensure schema + WAL.
pub fn open_db(path: &Path) -> ScanResult<Connection> {
    let conn = Connection::open(path).map_err(ScanError::persistence("open database"))?;
    configure(&conn).map_err(ScanError::persistence("configure connection"))?;
    apply_wal_and_schema(&conn).map_err(ScanError::persistence("create schema"))?;
    Ok(conn)
}
