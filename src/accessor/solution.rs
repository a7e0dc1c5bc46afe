use super::Scope;
use crate::db::schema::Table;
use crate::error::Result;
use crate::interner::IdMode;
use crate::keys::KeyResolver;
use rusqlite::{Connection, Statement};

/// Solution-wide streams. The stream name itself is the data id.
pub struct SolutionScope;

impl Scope for SolutionScope {
    type Key = String;
    type DataId = String;

    const TABLE: Table = Table::Solution;
    const NAME: &'static str = "solution";

    fn resolve_id(
        _resolver: &KeyResolver,
        _conn: &mut Connection,
        key: &String,
        _mode: IdMode,
    ) -> Result<Option<String>> {
        Ok(Some(key.clone()))
    }

    fn bind_id(stmt: &mut Statement<'_>, index: usize, id: &String) -> rusqlite::Result<()> {
        stmt.raw_bind_parameter(index, id.as_str())
    }
}
