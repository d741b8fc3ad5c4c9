use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use chrono::{DateTime, NaiveDateTime, Utc};
use dqmirror_core::error::{MirrorError, Result};
use dqmirror_core::query::StoreStatus;
use duckdb::Connection;

use crate::schema::SCHEMA_SQL;

const MEMORY_PATH: &str = ":memory:";
const IN_MEMORY_POOL_SIZE: usize = 2;

/// Fixed set of connections to one database. No overflow: when every slot is
/// busy the caller waits for one to free up.
struct Pool {
    slots: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl Pool {
    fn new(conn: Connection, size: usize) -> Result<Self> {
        let mut slots = Vec::with_capacity(size.max(1));
        for _ in 1..size.max(1) {
            let clone = conn
                .try_clone()
                .map_err(|e| MirrorError::Store(format!("failed to open pooled connection: {e}")))?;
            slots.push(Mutex::new(clone));
        }
        slots.push(Mutex::new(conn));
        Ok(Self {
            slots,
            next: AtomicUsize::new(0),
        })
    }

    fn acquire(&self) -> MutexGuard<'_, Connection> {
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let len = self.slots.len();
        for offset in 0..len {
            match self.slots[(start + offset) % len].try_lock() {
                Ok(guard) => return guard,
                Err(TryLockError::Poisoned(poisoned)) => return poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => continue,
            }
        }
        self.slots[start % len]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct Store {
    pool: Arc<Pool>,
    db_path: String,
}

impl Store {
    pub fn open(path: &Path, pool_size: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| MirrorError::Io(format!("failed to create db dir: {e}")))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| MirrorError::Store(format!("failed to open duckdb: {e}")))?;
        conn.execute_batch("PRAGMA threads=4;")
            .map_err(|e| MirrorError::Store(format!("failed to set pragmas: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| MirrorError::Store(format!("failed to initialize schema: {e}")))?;

        tracing::debug!(path = %path.display(), pool_size, "opened mirror store");
        Ok(Self {
            pool: Arc::new(Pool::new(conn, pool_size)?),
            db_path: path.display().to_string(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MirrorError::Store(format!("failed to open in-memory db: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| MirrorError::Store(format!("failed to initialize schema: {e}")))?;
        Ok(Self {
            pool: Arc::new(Pool::new(conn, IN_MEMORY_POOL_SIZE)?),
            db_path: MEMORY_PATH.to_string(),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.pool.acquire()
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub fn pool_size(&self) -> usize {
        self.pool.slots.len()
    }

    pub fn status(&self) -> Result<StoreStatus> {
        let bounds = self.min_max_runs()?.map(Into::into);
        let conn = self.conn();

        let runs_count = scalar_usize(&conn, "SELECT COUNT(*) FROM runs")?;
        let graphs_count = scalar_usize(&conn, "SELECT COUNT(*) FROM graphs")?;
        let hostnames_count = scalar_usize(&conn, "SELECT COUNT(*) FROM hostnames")?;
        let host_status_count = scalar_usize(&conn, "SELECT COUNT(*) FROM host_statuses")?;
        let newest_run_ts = scalar_ts(&conn, "SELECT MAX(timestamp) FROM runs")?;

        let db_size_bytes = if self.db_path == MEMORY_PATH {
            0
        } else {
            fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStatus {
            db_path: self.db_path.clone(),
            db_size_bytes,
            runs_count,
            graphs_count,
            hostnames_count,
            host_status_count,
            bounds,
            newest_run_ts,
        })
    }
}

fn scalar_usize(conn: &Connection, sql: &str) -> Result<usize> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|v| v as usize)
        .map_err(|e| MirrorError::Store(format!("query failed: {e}")))
}

fn scalar_ts(conn: &Connection, sql: &str) -> Result<Option<DateTime<Utc>>> {
    conn.query_row(sql, [], |row| row.get::<_, Option<NaiveDateTime>>(0))
        .map(|opt| opt.map(|dt| dt.and_utc()))
        .map_err(|e| MirrorError::Store(format!("query failed: {e}")))
}
