use super::Scope;
use crate::db::schema::Table;
use crate::error::Result;
use crate::interner::IdMode;
use crate::keys::{KeyResolver, combine};
use crate::model::ProjectKey;
use rusqlite::{Connection, Statement};

/// Streams attached to one project, keyed by `(project id << 32) | name id`.
pub struct ProjectScope;

impl Scope for ProjectScope {
    type Key = (ProjectKey, String);
    type DataId = i64;

    const TABLE: Table = Table::Project;
    const NAME: &'static str = "project";

    fn resolve_id(
        resolver: &KeyResolver,
        conn: &mut Connection,
        (project, name): &(ProjectKey, String),
        mode: IdMode,
    ) -> Result<Option<i64>> {
        let Some(project_id) = resolver.project_id(conn, project, mode)? else {
            return Ok(None);
        };
        let Some(name_id) = resolver.string_id(conn, name, mode)? else {
            return Ok(None);
        };
        Ok(Some(combine(project_id, name_id)))
    }

    fn bind_id(stmt: &mut Statement<'_>, index: usize, id: &i64) -> rusqlite::Result<()> {
        stmt.raw_bind_parameter(index, *id)
    }

    fn id_as_row_id(id: &i64) -> Option<i64> {
        Some(*id)
    }
}
