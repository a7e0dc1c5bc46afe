use rusqlite::ErrorCode;
use std::path::PathBuf;

/// Errors surfaced by the storage engine.
///
/// Accessors never return these to callers of the read/write API; they are
/// logged and turned into an absent result. Opening a store and the
/// diagnostic entry points do propagate them.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database folder {} is already owned by another process", .0.display())]
    AlreadyOpen(PathBuf),

    #[error("storage is shutting down")]
    ShuttingDown,

    #[error("injected fault: {0}")]
    Injected(String),

    #[error("string id {0} does not fit in 32 bits")]
    IdOverflow(i64),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// True when the engine rejected a write because of a uniqueness constraint.
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// True for transient page/table lock contention (SQLITE_BUSY, SQLITE_LOCKED).
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

impl StorageError {
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StorageError::Sqlite(err) if is_constraint_violation(err))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, StorageError::Sqlite(err) if is_busy(err))
    }
}
