use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectHandle(Uuid);

impl ProjectHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ProjectHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentHandle(Uuid);

impl DocumentHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DocumentHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a project as seen by the store.
///
/// The persisted id is derived from `file_path` and `name`; a project missing
/// either cannot be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectKey {
    pub handle: ProjectHandle,
    pub file_path: Option<String>,
    pub name: Option<String>,
}

impl ProjectKey {
    pub fn new(file_path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            handle: ProjectHandle::new(),
            file_path: Some(file_path.into()),
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentKey {
    pub project: ProjectKey,
    pub handle: DocumentHandle,
    pub file_path: Option<String>,
    pub name: Option<String>,
}

impl DocumentKey {
    pub fn new(project: &ProjectKey, file_path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.clone(),
            handle: DocumentHandle::new(),
            file_path: Some(file_path.into()),
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub key: ProjectKey,
    pub documents: Vec<DocumentKey>,
}

/// Snapshot of the solution a store is opened for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolutionInfo {
    pub file_path: Option<String>,
    pub projects: Vec<ProjectInfo>,
}

impl SolutionInfo {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: Some(file_path.into()),
            projects: Vec::new(),
        }
    }

    pub fn project(&self, handle: ProjectHandle) -> Option<&ProjectInfo> {
        self.projects.iter().find(|p| p.key.handle == handle)
    }
}

/// Row counts of one scope's main and write-cache tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub main: u64,
    pub write_cache: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub strings: u64,
    pub solution: TableCounts,
    pub project: TableCounts,
    pub document: TableCounts,
}
