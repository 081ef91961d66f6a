//! Database operations: schema, pooled open, batched ingest, connection and file repositories,
//! scan leases.

mod connections;
mod files;
mod ingest;
mod leases;
mod open;
mod pool;

pub use connections::{
    create_connection, delete_connection, due_connections, get_connection, list_connections,
    mark_scanned, update_connection,
};
pub use files::{count_files, files_for_connection, search_files};
pub use ingest::{IngestWriter, ingest};
pub use leases::ScanLease;
pub use open::open_db;
pub use pool::{DbPool, PooledConnection};

/// WAL tuning pragmas (synchronous, autocheckpoint, size limit). Use after PRAGMA journal_mode = WAL.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        "#;

/// Upsert keyed on `path`. A path seen again is re-stamped with the scan's `updated_at` and moves
/// to the scanning connection.
pub(crate) const UPSERT_FILE_SQL: &str = r#"
INSERT INTO files (connection_id, path, name, size, mod_time, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
ON CONFLICT(path) DO UPDATE SET
    connection_id = excluded.connection_id,
    size = excluded.size,
    mod_time = excluded.mod_time,
    updated_at = excluded.updated_at
"#;

/// Schema for connections, files and scan_leases tables.
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS connections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    base_path TEXT NOT NULL,
    remote_path TEXT NOT NULL DEFAULT '',
    username TEXT,
    password TEXT,
    options TEXT,
    user_id INTEGER NOT NULL,
    last_scan TEXT,
    scan_interval INTEGER NOT NULL DEFAULT 604800 CHECK (scan_interval > 0),
    auto_scan INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_connections_user ON connections(user_id);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    connection_id INTEGER NOT NULL REFERENCES connections(id) ON DELETE CASCADE,
    path TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    size INTEGER NOT NULL CHECK (size >= 0),
    mod_time TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_name ON files(name);
CREATE INDEX IF NOT EXISTS idx_files_connection ON files(connection_id);

CREATE TABLE IF NOT EXISTS scan_leases (
    connection_id INTEGER PRIMARY KEY REFERENCES connections(id) ON DELETE CASCADE,
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL
);
"#;
