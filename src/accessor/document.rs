use super::Scope;
use crate::db::schema::Table;
use crate::error::Result;
use crate::interner::IdMode;
use crate::keys::{KeyResolver, combine};
use crate::model::DocumentKey;
use rusqlite::{Connection, Statement};

/// Streams attached to one document, keyed by `(document id << 32) | name id`.
///
/// The document id is itself interned from `project-path-name` ids, so it is
/// unique across projects.
pub struct DocumentScope;

impl Scope for DocumentScope {
    type Key = (DocumentKey, String);
    type DataId = i64;

    const TABLE: Table = Table::Document;
    const NAME: &'static str = "document";

    fn resolve_id(
        resolver: &KeyResolver,
        conn: &mut Connection,
        (document, name): &(DocumentKey, String),
        mode: IdMode,
    ) -> Result<Option<i64>> {
        let Some(document_id) = resolver.document_id(conn, document, mode)? else {
            return Ok(None);
        };
        let Some(name_id) = resolver.string_id(conn, name, mode)? else {
            return Ok(None);
        };
        Ok(Some(combine(document_id, name_id)))
    }

    fn bind_id(stmt: &mut Statement<'_>, index: usize, id: &i64) -> rusqlite::Result<()> {
        stmt.raw_bind_parameter(index, *id)
    }

    fn id_as_row_id(id: &i64) -> Option<i64> {
        Some(*id)
    }
}
