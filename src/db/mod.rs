use crate::config::Config;
use crate::error::{Result, StorageError};
use crate::fault::FaultInjector;
use crate::model::{StorageStats, TableCounts};
use r2d2::{ManageConnection, Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction, ffi};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

pub mod schema;

use schema::{Location, Table};

pub const DATABASE_FILE_NAME: &str = "storage.ide";
pub const WRITE_CACHE_FILE_NAME: &str = "storage.ide.writecache";

/// Opens connections for the pool and decides whether a released connection
/// goes back to it.
///
/// Once shutdown starts every released connection reports itself broken, so
/// r2d2 closes it instead of pooling it.
struct StoreConnectionManager {
    inner: SqliteConnectionManager,
    shutting_down: Arc<AtomicBool>,
    faults: Option<Arc<dyn FaultInjector>>,
}

impl ManageConnection for StoreConnectionManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> std::result::Result<Connection, rusqlite::Error> {
        if let Some(faults) = &self.faults {
            faults.on_new_connection().map_err(|fault| {
                rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_IOERR), Some(fault.0))
            })?;
        }
        self.inner.connect()
    }

    fn is_valid(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        self.inner.is_valid(conn)
    }

    fn has_broken(&self, _conn: &mut Connection) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct ConnectionCustomizer {
    write_cache_path: PathBuf,
    busy_timeout: Duration,
    statement_cache: usize,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.busy_timeout(self.busy_timeout)?;
        conn.set_prepared_statement_cache_capacity(self.statement_cache);
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        conn.execute(
            "ATTACH DATABASE ?1 AS writecache",
            [self.write_cache_path.to_string_lossy().into_owned()],
        )?;
        conn.execute_batch(
            "
            PRAGMA writecache.journal_mode = WAL;
            PRAGMA writecache.synchronous = OFF;
            ",
        )?;
        Ok(())
    }

    fn on_release(&self, _conn: Connection) {}
}

/// A pooled connection leased to one caller at a time.
///
/// Returned to the pool (or closed, during shutdown) when dropped.
pub struct StoreConnection {
    conn: PooledConnection<StoreConnectionManager>,
}

impl StoreConnection {
    /// Run `f` inside one transaction, committing on success and rolling back
    /// on error.
    pub fn run_in_transaction<T>(
        &mut self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let tx = self.conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

impl Deref for StoreConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for StoreConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

pub struct Db {
    db_path: PathBuf,
    pool: Mutex<Option<Pool<StoreConnectionManager>>>,
    shutting_down: Arc<AtomicBool>,
}

impl Db {
    /// Open (creating if needed) the database inside `database_dir` and make
    /// sure the schema exists.
    pub fn open(
        database_dir: &Path,
        config: &Config,
        faults: Option<Arc<dyn FaultInjector>>,
    ) -> Result<Self> {
        std::fs::create_dir_all(database_dir)?;
        let db_path = database_dir.join(DATABASE_FILE_NAME);
        let write_cache_path = database_dir.join(WRITE_CACHE_FILE_NAME);

        info!(
            "Opening storage at {} (pool size: {})",
            db_path.display(),
            config.pool_size
        );

        let shutting_down = Arc::new(AtomicBool::new(false));
        let manager = StoreConnectionManager {
            inner: SqliteConnectionManager::file(&db_path),
            shutting_down: Arc::clone(&shutting_down),
            faults,
        };
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(0))
            .test_on_check_out(false)
            .connection_timeout(config.busy_timeout())
            .connection_customizer(Box::new(ConnectionCustomizer {
                write_cache_path,
                busy_timeout: config.busy_timeout(),
                statement_cache: config.statement_cache,
            }))
            .build_unchecked(manager);

        let db = Self {
            db_path,
            pool: Mutex::new(Some(pool)),
            shutting_down,
        };
        let conn = db.acquire()?;
        schema::create(&conn)?;
        drop(conn);
        Ok(db)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Lease a connection: an idle one if available, otherwise a fresh one.
    pub fn acquire(&self) -> Result<StoreConnection> {
        let pool = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StorageError::ShuttingDown)?;
        let conn = pool.get()?;
        Ok(StoreConnection { conn })
    }

    /// Atomically migrate all write-cache rows into the main tables.
    pub fn flush(&self) -> Result<usize> {
        let mut conn = self.acquire()?;
        let moved = conn.run_in_transaction(|tx| Ok(schema::flush_write_cache(tx)?))?;
        debug!("Flushed {} write-cache rows", moved);
        Ok(moved)
    }

    pub fn stats(&self) -> Result<StorageStats> {
        let conn = self.acquire()?;
        let counts = |table: Table| -> Result<TableCounts> {
            Ok(TableCounts {
                main: schema::count_rows(&conn, Location::Main, table)?,
                write_cache: schema::count_rows(&conn, Location::WriteCache, table)?,
            })
        };
        let strings = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", schema::STRING_TABLE),
            [],
            |row| row.get::<_, i64>(0),
        )? as u64;
        Ok(StorageStats {
            strings,
            solution: counts(Table::Solution)?,
            project: counts(Table::Project)?,
            document: counts(Table::Document)?,
        })
    }

    /// Stop handing out connections and close every idle one. Connections
    /// still leased are closed as soon as their holders release them.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let pool = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            let state = pool.state();
            debug!(
                "Closing connection pool ({} connections, {} idle)",
                state.connections, state.idle_connections
            );
        }
    }
}
