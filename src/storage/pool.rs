//! Bounded SQLite connection pool.
//!
//! Hands out at most `max_connections` live handles. Idle handles are reused;
//! when every handle is in use, [`ConnectionPool::acquire`] fails fast with
//! [`StorageError::PoolExhausted`] instead of blocking.
//!
//! Bookkeeping (idle set, in-use count, closed flag) lives behind one mutex.
//! Opening, configuring and closing handles happens outside of it.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;

use crate::storage::StorageError;

/// Default maximum connections in the pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default time a writer waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default page cache size (pages).
pub const DEFAULT_CACHE_SIZE: i64 = 10_000;

/// Per-handle engine settings.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub cache_size: i64,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub idle: u32,
    pub in_use: u32,
    pub max_connections: u32,
    pub closed: bool,
}

struct PoolState {
    idle: Vec<Connection>,
    in_use: u32,
    closed: bool,
}

/// Connection pool shared by all storage facades.
pub struct ConnectionPool {
    db_path: PathBuf,
    options: PoolOptions,
    state: Mutex<PoolState>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("db_path", &self.db_path)
            .field("max_connections", &self.options.max_connections)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Create an empty pool. No handle is opened until the first `acquire`.
    pub fn new(db_path: impl AsRef<Path>, options: PoolOptions) -> Arc<Self> {
        tracing::info!(
            path = %db_path.as_ref().display(),
            max_connections = options.max_connections,
            "Initialized database connection pool"
        );
        Arc::new(Self {
            db_path: db_path.as_ref().to_path_buf(),
            options,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                in_use: 0,
                closed: false,
            }),
        })
    }

    /// Path of the database file served by this pool.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Get a connection, reusing an idle one or opening a new one.
    ///
    /// # Errors
    /// - [`StorageError::PoolExhausted`] when `max_connections` handles are in use
    /// - [`StorageError::PoolClosed`] after [`close_all`](Self::close_all)
    /// - [`StorageError::Database`] when a new handle cannot be opened
    pub fn acquire(self: &Arc<Self>) -> Result<PooledConnection, StorageError> {
        {
            let mut state = self.lock_state();
            if state.closed {
                return Err(StorageError::PoolClosed);
            }
            if let Some(conn) = state.idle.pop() {
                state.in_use += 1;
                tracing::trace!(in_use = state.in_use, "Reused connection from pool");
                return Ok(PooledConnection::new(conn, Arc::clone(self)));
            }
            if state.in_use >= self.options.max_connections {
                tracing::warn!(
                    max_connections = self.options.max_connections,
                    "Connection pool exhausted"
                );
                return Err(StorageError::PoolExhausted {
                    max: self.options.max_connections,
                });
            }
            // Reserve the slot before releasing the lock
            state.in_use += 1;
        }

        match open_connection(&self.db_path, &self.options) {
            Ok(conn) => {
                tracing::debug!(
                    max_connections = self.options.max_connections,
                    "Created new pooled connection"
                );
                Ok(PooledConnection::new(conn, Arc::clone(self)))
            }
            Err(e) => {
                let mut state = self.lock_state();
                state.in_use = state.in_use.saturating_sub(1);
                Err(e)
            }
        }
    }

    /// Return a connection to the pool.
    ///
    /// Equivalent to dropping the guard.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Close every idle connection and refuse further acquisitions.
    ///
    /// Connections currently checked out are closed as soon as their holder
    /// releases them. Close failures are logged, never returned.
    pub fn close_all(&self) {
        let (idle, in_use) = {
            let mut state = self.lock_state();
            state.closed = true;
            (std::mem::take(&mut state.idle), state.in_use)
        };

        let closed = idle.len();
        for conn in idle {
            close_connection(conn);
        }
        tracing::info!(closed, in_use, "Closed all database connections");
    }

    /// Current occupancy.
    pub fn status(&self) -> PoolStatus {
        let state = self.lock_state();
        PoolStatus {
            // Never exceeds max_connections
            idle: u32::try_from(state.idle.len()).unwrap_or(u32::MAX),
            in_use: state.in_use,
            max_connections: self.options.max_connections,
            closed: state.closed,
        }
    }

    fn give_back(&self, conn: Connection) {
        // Never park a handle mid-transaction
        let clean = conn.is_autocommit() || {
            match conn.execute_batch("ROLLBACK") {
                Ok(()) => {
                    tracing::warn!("Rolled back open transaction on released connection");
                    true
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Rollback failed, discarding connection");
                    false
                }
            }
        };

        let mut state = self.lock_state();
        state.in_use = state.in_use.saturating_sub(1);
        let capacity = self.options.max_connections as usize;
        if clean && !state.closed && state.idle.len() < capacity {
            state.idle.push(conn);
            return;
        }
        drop(state);

        close_connection(conn);
        tracing::debug!("Closed excess connection");
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        // Bookkeeping stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked-out connection. Returns itself to the pool on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ConnectionPool>,
}

impl PooledConnection {
    fn new(conn: Connection, pool: Arc<ConnectionPool>) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("pooled connection is present until dropped")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .expect("pooled connection is present until dropped")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn);
        }
    }
}

/// Open and configure one handle: WAL journal, NORMAL sync, in-memory temp
/// storage, large page cache and a busy timeout.
fn open_connection(path: &Path, options: &PoolOptions) -> Result<Connection, StorageError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(options.busy_timeout)?;

    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::warn!(journal_mode = %mode, "Database did not switch to WAL mode");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "cache_size", options.cache_size)?;

    Ok(conn)
}

fn close_connection(conn: Connection) {
    if let Err((_, e)) = conn.close() {
        tracing::error!(error = %e, "Failed to close database connection");
    }
}
