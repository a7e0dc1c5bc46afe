use crate::db::schema::STRING_TABLE;
use crate::error::{Result, StorageError, is_busy, is_constraint_violation};
use dashmap::DashMap;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

/// Whether resolving a string may add it to the string table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMode {
    /// Only find existing ids. Used on the read path, which never writes.
    Lookup,
    /// Insert the string on first sight.
    Create,
}

/// Persistent string-to-id table with an in-memory cache in both directions.
///
/// Ids are assigned by the database and never change once handed out, so the
/// cache never needs invalidation.
#[derive(Debug, Default)]
pub struct StringInterner {
    ids: DashMap<String, i32>,
    strings: DashMap<i32, String>,
}

fn to_string_id(id: i64) -> Result<i32> {
    i32::try_from(id).map_err(|_| StorageError::IdOverflow(id))
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_id(&self, value: &str) -> Option<i32> {
        self.ids.get(value).map(|id| *id)
    }

    pub fn cached_string(&self, id: i32) -> Option<String> {
        self.strings.get(&id).map(|s| s.clone())
    }

    pub fn cached_len(&self) -> usize {
        self.ids.len()
    }

    fn remember(&self, value: &str, id: i32) {
        self.ids.entry(value.to_string()).or_insert(id);
        self.strings.entry(id).or_insert_with(|| value.to_string());
    }

    /// Id for `value`. With [`IdMode::Create`] the string is inserted on first
    /// sight; with [`IdMode::Lookup`] an unknown string yields `None` and is
    /// not cached.
    ///
    /// A missing string yields `None`: null keys are never stored.
    pub fn get_id(&self, conn: &Connection, value: Option<&str>, mode: IdMode) -> Result<Option<i32>> {
        let Some(value) = value else {
            return Ok(None);
        };
        if let Some(id) = self.cached_id(value) {
            return Ok(Some(id));
        }

        if let Some(id) = select_id(conn, value)? {
            self.remember(value, id);
            return Ok(Some(id));
        }
        if mode == IdMode::Lookup {
            return Ok(None);
        }

        let inserted = conn
            .prepare_cached(&format!("INSERT INTO {STRING_TABLE} (Data) VALUES (?)"))?
            .execute(params![value]);
        let id = match inserted {
            Ok(_) => to_string_id(conn.last_insert_rowid())?,
            Err(err) if is_constraint_violation(&err) => {
                // Another connection inserted it between our select and insert.
                match select_id(conn, value)? {
                    Some(id) => id,
                    None => return Err(err.into()),
                }
            }
            Err(err) => return Err(err.into()),
        };
        self.remember(value, id);
        Ok(Some(id))
    }

    /// Load the whole string table into the cache.
    ///
    /// Returns `false` when the table is locked by another writer; the caller
    /// should fall back to per-string lookups or try again later.
    pub fn bulk_fetch(&self, conn: &Connection) -> Result<bool> {
        match fetch_all(conn) {
            Ok(rows) => {
                debug!("Fetched {} interned strings", rows.len());
                for (id, value) in rows {
                    self.remember(&value, id);
                }
                Ok(true)
            }
            Err(StorageError::Sqlite(err)) if is_busy(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Insert a batch of strings in one transaction.
    ///
    /// Returns `false` without touching the cache if any of them already exists
    /// in the table, which means a concurrent writer got there first; the caller
    /// should `bulk_fetch` and retry with what is still missing.
    pub fn bulk_insert(&self, conn: &mut Connection, values: &[String]) -> Result<bool> {
        let tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(values.len());
        {
            let mut stmt = tx.prepare_cached(&format!("INSERT INTO {STRING_TABLE} (Data) VALUES (?)"))?;
            for value in values {
                match stmt.execute(params![value]) {
                    Ok(_) => inserted.push((value, to_string_id(tx.last_insert_rowid())?)),
                    Err(err) if is_constraint_violation(&err) || is_busy(&err) => {
                        debug!("Bulk string insert lost a race: {}", err);
                        return Ok(false);
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        match tx.commit() {
            Ok(()) => {}
            Err(err) if is_busy(&err) => return Ok(false),
            Err(err) => return Err(err.into()),
        }

        for (value, id) in inserted {
            self.remember(value, id);
        }
        Ok(true)
    }

    /// Make sure every string in `values` has a cached id, using the bulk paths.
    ///
    /// Returns `false` if contention kept some of them unresolved.
    pub fn ensure_all(&self, conn: &mut Connection, values: &[String]) -> Result<bool> {
        const ATTEMPTS: usize = 3;

        let missing = |interner: &Self| -> Vec<String> {
            let mut out: Vec<String> = values
                .iter()
                .filter(|v| interner.cached_id(v).is_none())
                .cloned()
                .collect();
            out.sort();
            out.dedup();
            out
        };

        if missing(self).is_empty() {
            return Ok(true);
        }
        if !self.bulk_fetch(conn)? {
            return Ok(false);
        }
        for _ in 0..ATTEMPTS {
            let todo = missing(self);
            if todo.is_empty() || self.bulk_insert(conn, &todo)? {
                return Ok(true);
            }
            if !self.bulk_fetch(conn)? {
                return Ok(false);
            }
        }
        Ok(missing(self).is_empty())
    }
}

fn select_id(conn: &Connection, value: &str) -> Result<Option<i32>> {
    let id: Option<i64> = conn
        .prepare_cached(&format!("SELECT DataId FROM {STRING_TABLE} WHERE Data = ?"))?
        .query_row(params![value], |row| row.get(0))
        .optional()?;
    id.map(to_string_id).transpose()
}

fn fetch_all(conn: &Connection) -> Result<Vec<(i32, String)>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT DataId, Data FROM {STRING_TABLE}"))?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
    let mut out = Vec::new();
    for row in rows {
        let (id, value) = row?;
        out.push((to_string_id(id)?, value));
    }
    Ok(out)
}
