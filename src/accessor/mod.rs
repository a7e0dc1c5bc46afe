use crate::checksum::Checksum;
use crate::db::Db;
use crate::db::schema::{Location, Table};
use crate::error::{Result, StorageError};
use crate::fault::FaultInjector;
use crate::interner::IdMode;
use crate::keys::KeyResolver;
use rusqlite::{Connection, OptionalExtension, Statement, Transaction};
use std::fmt::Debug;
use std::io::Read;
use std::marker::PhantomData;
use tracing::{debug, warn};

mod document;
mod project;
mod solution;

pub use document::DocumentScope;
pub use project::ProjectScope;
pub use solution::SolutionScope;

const CHECKSUM_COLUMN: &str = "Checksum";
const DATA_COLUMN: &str = "Data";

/// One granularity at which streams are keyed.
///
/// A scope names its table and knows how to turn a caller's key into the
/// value stored in the `DataId` column.
pub trait Scope: Send + Sync + 'static {
    type Key: Send + Sync + 'static;
    type DataId: Debug + Send;

    const TABLE: Table;
    const NAME: &'static str;

    /// Resolve `key` to its data id; `None` if the key can never be stored,
    /// or, under [`IdMode::Lookup`], was never stored.
    fn resolve_id(
        resolver: &KeyResolver,
        conn: &mut Connection,
        key: &Self::Key,
        mode: IdMode,
    ) -> Result<Option<Self::DataId>>;

    fn bind_id(stmt: &mut Statement<'_>, index: usize, id: &Self::DataId) -> rusqlite::Result<()>;

    /// The row id a data id is stored under, when the two are the same number.
    fn id_as_row_id(_id: &Self::DataId) -> Option<i64> {
        None
    }
}

/// Checksum-gated reads and buffered writes for one scope.
pub struct Accessor<'a, S: Scope> {
    db: &'a Db,
    resolver: &'a KeyResolver,
    faults: Option<&'a dyn FaultInjector>,
    _scope: PhantomData<S>,
}

impl<'a, S: Scope> Accessor<'a, S> {
    pub fn new(db: &'a Db, resolver: &'a KeyResolver, faults: Option<&'a dyn FaultInjector>) -> Self {
        Self {
            db,
            resolver,
            faults,
            _scope: PhantomData,
        }
    }

    pub fn read_checksum(&self, key: &S::Key) -> Option<Checksum> {
        self.try_read_checksum(key)
            .unwrap_or_else(|err| self.degrade("read_checksum", err))
    }

    pub fn read_stream(&self, key: &S::Key, expected: Option<&Checksum>) -> Option<Vec<u8>> {
        self.try_read_stream(key, expected)
            .unwrap_or_else(|err| self.degrade("read_stream", err))
    }

    /// Buffer `data` in the write cache. Returns `true` once the row is stored.
    pub fn write_stream(&self, key: &S::Key, data: &[u8], checksum: Option<&Checksum>) -> bool {
        self.try_write_stream(key, data, checksum)
            .unwrap_or_else(|err| self.degrade::<()>("write_stream", err).is_some())
    }

    fn degrade<T>(&self, op: &str, err: StorageError) -> Option<T> {
        if matches!(err, StorageError::ShuttingDown) {
            debug!(scope = S::NAME, op, "Skipped, storage is shutting down");
            return None;
        }
        warn!(scope = S::NAME, op, error = %err, "Storage operation failed");
        if let Some(faults) = self.faults {
            faults.on_fatal_error(&err);
        }
        None
    }

    fn try_read_checksum(&self, key: &S::Key) -> Result<Option<Checksum>> {
        let mut conn = self.db.acquire()?;
        let Some(id) = S::resolve_id(self.resolver, &mut conn, key, IdMode::Lookup)? else {
            return Ok(None);
        };
        conn.run_in_transaction(|tx| {
            let Some((location, rowid)) = find_row::<S>(tx, &id)? else {
                return Ok(None);
            };
            Ok(Checksum::from_column(read_column::<S>(
                tx,
                location,
                rowid,
                CHECKSUM_COLUMN,
            )?))
        })
    }

    fn try_read_stream(&self, key: &S::Key, expected: Option<&Checksum>) -> Result<Option<Vec<u8>>> {
        let mut conn = self.db.acquire()?;
        let Some(id) = S::resolve_id(self.resolver, &mut conn, key, IdMode::Lookup)? else {
            return Ok(None);
        };
        // The checksum comparison and the data read share one transaction so a
        // concurrent write can never pair one row's checksum with another's data.
        conn.run_in_transaction(|tx| {
            let Some((location, rowid)) = find_row::<S>(tx, &id)? else {
                return Ok(None);
            };
            if let Some(expected) = expected {
                let stored = read_column::<S>(tx, location, rowid, CHECKSUM_COLUMN)?;
                // A row stored without a checksum never satisfies an expected one.
                if Checksum::from_column(stored).as_ref() != Some(expected) {
                    return Ok(None);
                }
            }
            Ok(Some(read_column::<S>(tx, location, rowid, DATA_COLUMN)?))
        })
    }

    fn try_write_stream(&self, key: &S::Key, data: &[u8], checksum: Option<&Checksum>) -> Result<bool> {
        let mut conn = self.db.acquire()?;
        let Some(id) = S::resolve_id(self.resolver, &mut conn, key, IdMode::Create)? else {
            return Ok(false);
        };
        let mut stmt = conn.prepare_cached(&format!(
            "INSERT OR REPLACE INTO {} (DataId, Checksum, Data) VALUES (?, ?, ?)",
            Location::WriteCache.qualified(S::TABLE)
        ))?;
        S::bind_id(&mut stmt, 1, &id)?;
        stmt.raw_bind_parameter(2, Checksum::to_column(checksum))?;
        stmt.raw_bind_parameter(3, data)?;
        stmt.raw_execute()?;
        Ok(true)
    }
}

/// Locate the row for `id`, preferring the write cache over the main table.
fn find_row<S: Scope>(conn: &Connection, id: &S::DataId) -> Result<Option<(Location, i64)>> {
    for location in [Location::WriteCache, Location::Main] {
        if let Some(rowid) = row_id::<S>(conn, location, id)? {
            return Ok(Some((location, rowid)));
        }
    }
    Ok(None)
}

fn row_id<S: Scope>(conn: &Connection, location: Location, id: &S::DataId) -> Result<Option<i64>> {
    let table = location.qualified(S::TABLE);
    if let Some(rowid) = S::id_as_row_id(id) {
        let present = conn
            .prepare_cached(&format!("SELECT 1 FROM {table} WHERE rowid = ?"))?
            .query_row([rowid], |_| Ok(()))
            .optional()?
            .is_some();
        if cfg!(debug_assertions) && present {
            debug_assert_eq!(lookup_row_id::<S>(conn, &table, id)?, Some(rowid));
        }
        return Ok(present.then_some(rowid));
    }
    lookup_row_id::<S>(conn, &table, id)
}

fn lookup_row_id<S: Scope>(conn: &Connection, table: &str, id: &S::DataId) -> Result<Option<i64>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT rowid FROM {table} WHERE DataId = ?"))?;
    S::bind_id(&mut stmt, 1, id)?;
    let mut rows = stmt.raw_query();
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

/// Read one blob column of a row.
///
/// Takes a transaction so that several column reads of the same row observe
/// one consistent snapshot.
fn read_column<S: Scope>(
    tx: &Transaction<'_>,
    location: Location,
    rowid: i64,
    column: &str,
) -> Result<Vec<u8>> {
    assert!(!tx.is_autocommit(), "blob reads require an open transaction");
    let mut blob = tx.blob_open(location.database_name(), S::TABLE.name(), column, rowid, true)?;
    let mut buf = Vec::with_capacity(usize::try_from(blob.len()).unwrap_or(0));
    blob.read_to_end(&mut buf)?;
    Ok(buf)
}
