//! Read side of the `files` table.

use rusqlite::{Connection, Row, params};

use crate::StoredFile;
use crate::error::{ScanError, ScanResult};

const COLUMNS: &str = "connection_id, path, name, size, mod_time, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<StoredFile> {
    let size: i64 = row.get(3)?;
    Ok(StoredFile {
        connection_id: row.get(0)?,
        path: row.get(1)?,
        name: row.get(2)?,
        size: size.max(0) as u64,
        mod_time: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Escape LIKE wildcards so the query matches literally.
fn like_pattern(query: &str) -> String {
    let mut p = String::with_capacity(query.len() + 2);
    p.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            p.push('\\');
        }
        p.push(c);
    }
    p.push('%');
    p
}

/// Case-insensitive substring match on file name, ordered by name then path.
pub fn search_files(conn: &Connection, query: &str, limit: usize) -> ScanResult<Vec<StoredFile>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM files WHERE name LIKE ?1 ESCAPE '\\' \
             ORDER BY name COLLATE NOCASE, path LIMIT ?2"
        ))
        .map_err(ScanError::persistence("prepare search"))?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt
        .query_map(params![like_pattern(query.trim()), limit], from_row)
        .map_err(ScanError::persistence("search files"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(ScanError::persistence("read file row"))
}

/// Files currently owned by one connection, by path.
pub fn files_for_connection(conn: &Connection, connection_id: i64) -> ScanResult<Vec<StoredFile>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM files WHERE connection_id = ?1 ORDER BY path"
        ))
        .map_err(ScanError::persistence("prepare file listing"))?;
    let rows = stmt
        .query_map([connection_id], from_row)
        .map_err(ScanError::persistence("list files"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(ScanError::persistence("read file row"))
}

pub fn count_files(conn: &Connection) -> ScanResult<u64> {
    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))
        .map_err(ScanError::persistence("count files"))?;
    Ok(n.max(0) as u64)
}
