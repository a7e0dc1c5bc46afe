pub mod accessor;
pub mod checksum;
pub mod config;
pub mod db;
pub mod error;
pub mod fault;
pub mod flush;
pub mod interner;
pub mod keys;
pub mod lock;
pub mod logging;
pub mod model;
pub mod storage;

pub use accessor::{DocumentScope, ProjectScope, Scope, SolutionScope};
pub use checksum::Checksum;
pub use config::Config;
pub use error::{Result, StorageError};
pub use fault::{FaultInjector, InjectedFault};
pub use model::{
    DocumentHandle, DocumentKey, ProjectHandle, ProjectInfo, ProjectKey, SolutionInfo,
    StorageStats, TableCounts,
};
pub use storage::{PersistentStorage, SqliteStorage, StorageOptions, StorageService};
