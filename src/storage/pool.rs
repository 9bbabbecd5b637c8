//! Bounded SQLite connection pool
//!
//! Connections are opened lazily up to the pool size and handed out one per
//! logical operation. An in-memory database lives only as long as its single
//! connection, so in-memory pools hold exactly one.

use crate::{Error, Result};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Memory,
    File(PathBuf),
}

struct State {
    idle: Vec<Connection>,
    opened: usize,
}

pub struct ConnectionPool {
    target: Target,
    size: usize,
    busy_timeout: Duration,
    state: Mutex<State>,
    available: Condvar,
}

impl ConnectionPool {
    /// Pool over a database file. The first connection is opened eagerly so a
    /// bad path fails here rather than on first use.
    pub fn open(path: impl Into<PathBuf>, size: usize, busy_timeout: Duration) -> Result<Self> {
        let pool = Self::new(Target::File(path.into()), size.max(1), busy_timeout);
        pool.reserve();
        let first = pool.connect()?;
        pool.release(first);
        Ok(pool)
    }

    /// Single-connection pool over a private in-memory database
    pub fn in_memory() -> Result<Self> {
        let pool = Self::new(Target::Memory, 1, Duration::from_millis(0));
        pool.reserve();
        let conn = pool.connect()?;
        pool.release(conn);
        Ok(pool)
    }

    fn new(target: Target, size: usize, busy_timeout: Duration) -> Self {
        Self {
            target,
            size,
            busy_timeout,
            state: Mutex::new(State {
                idle: Vec::with_capacity(size),
                opened: 0,
            }),
            available: Condvar::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_in_memory(&self) -> bool {
        self.target == Target::Memory
    }

    /// Check out a connection, waiting up to the busy timeout when all are in use
    pub fn get(&self) -> Result<PooledConnection<'_>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }
            if state.opened < self.size {
                state.opened += 1;
                drop(state);
                let conn = self.connect()?;
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }

            let wait = self.busy_timeout.max(Duration::from_millis(100));
            let (next, timeout) = self
                .available
                .wait_timeout(state, wait)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
            if timeout.timed_out() && state.idle.is_empty() && state.opened >= self.size {
                return Err(Error::DatabaseUnavailable(format!(
                    "all {} connections busy after {:?}",
                    self.size, wait
                )));
            }
        }
    }

    fn reserve(&self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).opened += 1;
    }

    /// Open a new connection into a slot already reserved against the pool size
    fn connect(&self) -> Result<Connection> {
        let opened = match &self.target {
            Target::Memory => Connection::open_in_memory(),
            Target::File(path) => Connection::open(path),
        }
        .and_then(|conn| {
            if !self.busy_timeout.is_zero() {
                conn.busy_timeout(self.busy_timeout)?;
            }
            Ok(conn)
        });

        match opened {
            Ok(conn) => {
                tracing::debug!("Opened database connection ({:?})", self.target);
                Ok(conn)
            }
            Err(e) => {
                self.state.lock().unwrap_or_else(PoisonError::into_inner).opened -= 1;
                self.available.notify_one();
                Err(Error::DatabaseUnavailable(e.to_string()))
            }
        }
    }

    fn release(&self, conn: Connection) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .idle
            .push(conn);
        self.available.notify_one();
    }
}

/// A checked-out connection, returned to the pool on drop
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_pool_reuses_one_connection() {
        let pool = ConnectionPool::in_memory().unwrap();
        assert_eq!(pool.size(), 1);
        {
            let conn = pool.get().unwrap();
            conn.execute("CREATE TABLE t (x INT)", []).unwrap();
        }
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE name = 't'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_file_pool_bounds_connections() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(dir.path().join("db.sqlite"), 2, Duration::from_millis(50)).unwrap();

        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        assert!(matches!(pool.get(), Err(Error::DatabaseUnavailable(_))));

        drop(a);
        assert!(pool.get().is_ok());
        drop(b);
    }

    #[test]
    fn test_unopenable_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("nested").join("db.sqlite");
        assert!(matches!(
            ConnectionPool::open(path, 1, Duration::from_millis(10)),
            Err(Error::DatabaseUnavailable(_))
        ));
    }
}
