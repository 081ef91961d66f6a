//! Fixed-size SQLite connection pool. Idle connections wait in a bounded channel; `get` checks one
//! out and the guard hands it back on drop.

use crossbeam_channel::{Receiver, Sender, bounded};
use log::warn;
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ScanError, ScanResult};
use crate::utils::config::POOL_CHECKOUT_TIMEOUT;

use super::open_db;

/// Shared handle to the pool; cheap to clone and safe to move across threads.
#[derive(Clone)]
pub struct DbPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    path: PathBuf,
    size: usize,
    checkout_timeout: Duration,
    idle_tx: Sender<Connection>,
    idle_rx: Receiver<Connection>,
}

impl std::fmt::Debug for DbPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbPool")
            .field("path", &self.inner.path)
            .field("size", &self.inner.size)
            .field("idle", &self.inner.idle_rx.len())
            .finish()
    }
}

impl DbPool {
    /// Open `size` connections to `path` (at least one), creating the schema if needed.
    pub fn open(path: &Path, size: usize) -> ScanResult<Self> {
        Self::open_with_timeout(path, size, POOL_CHECKOUT_TIMEOUT)
    }

    pub fn open_with_timeout(path: &Path, size: usize, checkout_timeout: Duration) -> ScanResult<Self> {
        let size = size.max(1);
        let (idle_tx, idle_rx) = bounded(size);
        for _ in 0..size {
            let conn = open_db(path)?;
            // Capacity equals `size`, so this never blocks.
            let _ = idle_tx.send(conn);
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                path: path.to_path_buf(),
                size,
                checkout_timeout,
                idle_tx,
                idle_rx,
            }),
        })
    }

    /// Check a connection out, waiting up to the checkout timeout.
    pub fn get(&self) -> ScanResult<PooledConnection> {
        let timeout = self.inner.checkout_timeout;
        let conn = self
            .inner
            .idle_rx
            .recv_timeout(timeout)
            .map_err(|_| ScanError::PoolTimeout {
                waited_secs: timeout.as_secs(),
            })?;
        Ok(PooledConnection {
            conn: Some(conn),
            idle: self.inner.idle_tx.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Connections currently checked in.
    pub fn idle(&self) -> usize {
        self.inner.idle_rx.len()
    }
}

/// A checked-out connection. Derefs to [`rusqlite::Connection`].
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Connection>,
    idle: Sender<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `Drop` takes the connection out.
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take()
            && self.idle.try_send(conn).is_err()
        {
            warn!("database pool is full or closed; dropping connection");
        }
    }
}
