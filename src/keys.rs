use crate::error::Result;
use crate::interner::{IdMode, StringInterner};
use crate::model::{DocumentHandle, DocumentKey, ProjectHandle, ProjectInfo, ProjectKey, SolutionInfo};
use dashmap::DashMap;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Pack two 32-bit ids into one 64-bit data id, `high` in the upper half.
pub fn combine(high: i32, low: i32) -> i64 {
    (i64::from(high) << 32) | i64::from(low as u32)
}

/// Inverse of [`combine`].
pub fn split(id: i64) -> (i32, i32) {
    ((id >> 32) as i32, id as u32 as i32)
}

pub fn project_id_string(path_id: i32, name_id: i32) -> String {
    format!("{path_id}-{name_id}")
}

pub fn document_id_string(project_id: i32, path_id: i32, name_id: i32) -> String {
    format!("{project_id}-{path_id}-{name_id}")
}

/// Turns logical keys (projects, documents, stream names) into the integer
/// ids the scope tables are keyed by.
///
/// Owns the interner and the per-entity id caches. Entities of the solution
/// snapshot are populated in bulk, once per project.
pub struct KeyResolver {
    strings: StringInterner,
    solution: SolutionInfo,
    project_ids: DashMap<ProjectHandle, i32>,
    document_ids: DashMap<DocumentHandle, i32>,
    populated: Mutex<HashMap<ProjectHandle, Arc<Mutex<bool>>>>,
}

impl KeyResolver {
    pub fn new(solution: SolutionInfo) -> Self {
        Self {
            strings: StringInterner::new(),
            solution,
            project_ids: DashMap::new(),
            document_ids: DashMap::new(),
            populated: Mutex::new(HashMap::new()),
        }
    }

    pub fn strings(&self) -> &StringInterner {
        &self.strings
    }

    pub fn solution(&self) -> &SolutionInfo {
        &self.solution
    }

    pub fn string_id(&self, conn: &Connection, value: &str, mode: IdMode) -> Result<Option<i32>> {
        self.strings.get_id(conn, Some(value), mode)
    }

    /// Id of a project. Under [`IdMode::Lookup`] nothing is written: bulk
    /// population is skipped and a project whose strings were never stored
    /// resolves to `None`.
    pub fn project_id(
        &self,
        conn: &mut Connection,
        project: &ProjectKey,
        mode: IdMode,
    ) -> Result<Option<i32>> {
        if let Some(id) = self.project_ids.get(&project.handle) {
            return Ok(Some(*id));
        }
        if mode == IdMode::Create {
            self.try_bulk_populate(conn, project.handle);
            if let Some(id) = self.project_ids.get(&project.handle) {
                return Ok(Some(*id));
            }
        }

        let strings = &self.strings;
        let Some(path_id) = strings.get_id(conn, project.file_path.as_deref(), mode)? else {
            return Ok(None);
        };
        let Some(name_id) = strings.get_id(conn, project.name.as_deref(), mode)? else {
            return Ok(None);
        };
        let composed = project_id_string(path_id, name_id);
        let Some(id) = strings.get_id(conn, Some(composed.as_str()), mode)? else {
            return Ok(None);
        };
        Ok(Some(*self.project_ids.entry(project.handle).or_insert(id)))
    }

    pub fn document_id(
        &self,
        conn: &mut Connection,
        document: &DocumentKey,
        mode: IdMode,
    ) -> Result<Option<i32>> {
        if let Some(id) = self.document_ids.get(&document.handle) {
            return Ok(Some(*id));
        }
        let Some(project_id) = self.project_id(conn, &document.project, mode)? else {
            return Ok(None);
        };
        if let Some(id) = self.document_ids.get(&document.handle) {
            return Ok(Some(*id));
        }

        let strings = &self.strings;
        let Some(path_id) = strings.get_id(conn, document.file_path.as_deref(), mode)? else {
            return Ok(None);
        };
        let Some(name_id) = strings.get_id(conn, document.name.as_deref(), mode)? else {
            return Ok(None);
        };
        let composed = document_id_string(project_id, path_id, name_id);
        let Some(id) = strings.get_id(conn, Some(composed.as_str()), mode)? else {
            return Ok(None);
        };
        Ok(Some(*self.document_ids.entry(document.handle).or_insert(id)))
    }

    /// Populate ids for every project of the solution snapshot.
    ///
    /// Returns the number of projects that were populated; the rest fall back
    /// to lazy per-call resolution.
    pub fn bulk_populate_solution(&self, conn: &mut Connection) -> usize {
        let handles: Vec<ProjectHandle> = self
            .solution
            .projects
            .iter()
            .map(|p| p.key.handle)
            .collect();
        let mut populated = 0;
        for handle in handles {
            if self.try_bulk_populate(conn, handle) {
                populated += 1;
            }
        }
        populated
    }

    fn try_bulk_populate(&self, conn: &mut Connection, handle: ProjectHandle) -> bool {
        match self.bulk_populate_project(conn, handle) {
            Ok(done) => done,
            Err(err) => {
                warn!("Bulk id population failed for project {:?}: {}", handle, err);
                false
            }
        }
    }

    fn gate(&self, handle: ProjectHandle) -> Arc<Mutex<bool>> {
        let mut gates = self.populated.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(handle).or_default())
    }

    /// Intern every path and name of one project and its documents in bulk,
    /// then cache the derived project and document ids.
    ///
    /// Only one caller runs this per project; concurrent callers wait on the
    /// gate and then see the finished result.
    pub fn bulk_populate_project(&self, conn: &mut Connection, handle: ProjectHandle) -> Result<bool> {
        let Some(project) = self.solution.project(handle) else {
            return Ok(false);
        };
        let gate = self.gate(handle);
        let mut done = gate.lock().unwrap_or_else(PoisonError::into_inner);
        if *done {
            return Ok(true);
        }

        if !self.strings.ensure_all(conn, &base_strings(project))? {
            debug!("Bulk population of {:?} deferred by contention", handle);
            return Ok(false);
        }

        let key = &project.key;
        let (Some(path_id), Some(name_id)) = (
            self.cached(key.file_path.as_deref()),
            self.cached(key.name.as_deref()),
        ) else {
            // A project without a path or name can never be stored.
            *done = true;
            return Ok(true);
        };

        let composed = project_id_string(path_id, name_id);
        if !self.strings.ensure_all(conn, std::slice::from_ref(&composed))? {
            return Ok(false);
        }
        let Some(project_id) = self.strings.cached_id(&composed) else {
            return Ok(false);
        };

        let mut documents = Vec::with_capacity(project.documents.len());
        for document in &project.documents {
            if let (Some(path_id), Some(name_id)) = (
                self.cached(document.file_path.as_deref()),
                self.cached(document.name.as_deref()),
            ) {
                documents.push((document.handle, document_id_string(project_id, path_id, name_id)));
            }
        }
        let composed: Vec<String> = documents.iter().map(|(_, s)| s.clone()).collect();
        if !self.strings.ensure_all(conn, &composed)? {
            return Ok(false);
        }

        self.project_ids.entry(handle).or_insert(project_id);
        for (document, composed) in documents {
            if let Some(id) = self.strings.cached_id(&composed) {
                self.document_ids.entry(document).or_insert(id);
            }
        }
        debug!(
            "Bulk populated project {:?} ({} documents)",
            handle,
            project.documents.len()
        );
        *done = true;
        Ok(true)
    }

    fn cached(&self, value: Option<&str>) -> Option<i32> {
        value.and_then(|v| self.strings.cached_id(v))
    }
}

fn base_strings(project: &ProjectInfo) -> Vec<String> {
    let key = &project.key;
    let mut strings: Vec<String> = [key.file_path.as_ref(), key.name.as_ref()]
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    for document in &project.documents {
        strings.extend(document.file_path.iter().cloned());
        strings.extend(document.name.iter().cloned());
    }
    strings
}
