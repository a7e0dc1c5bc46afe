use crate::accessor::{Accessor, DocumentScope, ProjectScope, Scope, SolutionScope};
use crate::checksum::Checksum;
use crate::config::Config;
use crate::db::Db;
use crate::error::{Result, StorageError};
use crate::fault::FaultInjector;
use crate::flush::{FlushScheduler, FlushState};
use crate::keys::KeyResolver;
use crate::lock::DatabaseLock;
use crate::model::{DocumentKey, ProjectKey, SolutionInfo, StorageStats};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{RwLock, Semaphore, watch};
use tracing::{debug, error, info, warn};

/// Subfolder of the working folder that holds the database and its lock.
pub const DATABASE_DIR_NAME: &str = "sqlite3";

pub fn database_dir(working_folder: &Path) -> PathBuf {
    working_folder.join(DATABASE_DIR_NAME)
}

#[derive(Clone)]
pub struct StorageOptions {
    pub working_folder: PathBuf,
    pub config: Config,
    pub faults: Option<Arc<dyn FaultInjector>>,
}

impl StorageOptions {
    pub fn new(working_folder: impl Into<PathBuf>) -> Self {
        Self {
            working_folder: working_folder.into(),
            config: Config::default(),
            faults: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_faults(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.faults = Some(faults);
        self
    }
}

struct Shared {
    db: Arc<Db>,
    resolver: KeyResolver,
    faults: Option<Arc<dyn FaultInjector>>,
    /// Exclusive scheduler: writes and flushes hold its single permit.
    write_gate: Arc<Semaphore>,
    /// Held shared by every read for as long as it leases a connection;
    /// `close` takes it exclusively to drain them.
    readers: Arc<RwLock<()>>,
    shutdown: watch::Sender<bool>,
    flusher: Arc<FlushScheduler>,
    lock: Mutex<Option<DatabaseLock>>,
}

impl Shared {
    fn accessor<S: Scope>(&self) -> Accessor<'_, S> {
        Accessor::new(&self.db, &self.resolver, self.faults.as_deref())
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// An open, exclusively owned store for one solution.
///
/// Cheap to clone; all clones share the same pool, caches and flush scheduler.
#[derive(Clone)]
pub struct SqliteStorage {
    shared: Arc<Shared>,
}

impl SqliteStorage {
    pub async fn open(options: StorageOptions, solution: SolutionInfo) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::open_blocking(options, solution)).await?
    }

    fn open_blocking(options: StorageOptions, solution: SolutionInfo) -> Result<Self> {
        let dir = database_dir(&options.working_folder);
        let lock = DatabaseLock::acquire(&dir)?;
        let db = Arc::new(Db::open(&dir, &options.config, options.faults.clone())?);

        let recovered = db.flush()?;
        if recovered > 0 {
            info!("Recovered {} unflushed rows from a previous session", recovered);
        }

        let resolver = KeyResolver::new(solution);
        match db.acquire() {
            Ok(mut conn) => {
                let total = resolver.solution().projects.len();
                let populated = resolver.bulk_populate_solution(&mut conn);
                debug!("Bulk populated {}/{} projects", populated, total);
            }
            Err(err) => warn!("Skipping bulk id population: {}", err),
        }

        let write_gate = Arc::new(Semaphore::new(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let flusher = FlushScheduler::new(
            Arc::clone(&db),
            Arc::clone(&write_gate),
            shutdown_rx,
            options.config.flush_delay(),
        );

        Ok(Self {
            shared: Arc::new(Shared {
                db,
                resolver,
                faults: options.faults,
                write_gate,
                readers: Arc::new(RwLock::new(())),
                shutdown,
                flusher,
                lock: Mutex::new(Some(lock)),
            }),
        })
    }

    pub fn db_path(&self) -> &Path {
        self.shared.db.db_path()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_shutting_down()
    }

    pub fn flush_state(&self) -> FlushState {
        self.shared.flusher.state()
    }

    /// Run `f` on the concurrent scheduler. `None` once shutdown was requested.
    async fn run_read<T, F>(&self, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&Shared) -> T + Send + 'static,
    {
        if self.shared.is_shutting_down() {
            return None;
        }
        let guard = Arc::clone(&self.shared.readers).read_owned().await;
        let shared = Arc::clone(&self.shared);
        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            if shared.is_shutting_down() {
                None
            } else {
                Some(f(&shared))
            }
        });
        match task.await {
            Ok(value) => value,
            Err(err) => {
                error!("Storage read task failed: {}", err);
                None
            }
        }
    }

    /// Run `f` on the exclusive scheduler, one at a time with other writes and
    /// flushes. `None` once shutdown was requested.
    async fn run_exclusive<T, F>(&self, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&Shared) -> T + Send + 'static,
    {
        let permit = Arc::clone(&self.shared.write_gate)
            .acquire_owned()
            .await
            .ok()?;
        let shared = Arc::clone(&self.shared);
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            if shared.is_shutting_down() {
                None
            } else {
                Some(f(&shared))
            }
        });
        match task.await {
            Ok(value) => value,
            Err(err) => {
                error!("Storage write task failed: {}", err);
                None
            }
        }
    }

    pub async fn read_checksum<S: Scope>(&self, key: S::Key) -> Option<Checksum> {
        self.run_read(move |shared| shared.accessor::<S>().read_checksum(&key))
            .await
            .flatten()
    }

    pub async fn read_stream<S: Scope>(
        &self,
        key: S::Key,
        expected: Option<Checksum>,
    ) -> Option<Vec<u8>> {
        self.run_read(move |shared| shared.accessor::<S>().read_stream(&key, expected.as_ref()))
            .await
            .flatten()
    }

    pub async fn write_stream<S: Scope>(
        &self,
        key: S::Key,
        data: Vec<u8>,
        checksum: Option<Checksum>,
    ) -> bool {
        let written = self
            .run_exclusive(move |shared| {
                shared
                    .accessor::<S>()
                    .write_stream(&key, &data, checksum.as_ref())
            })
            .await
            .unwrap_or(false);
        if written {
            self.shared.flusher.signal();
        }
        written
    }

    pub async fn read_solution_checksum(&self, name: &str) -> Option<Checksum> {
        self.read_checksum::<SolutionScope>(name.to_string()).await
    }

    pub async fn read_solution_stream(&self, name: &str, expected: Option<Checksum>) -> Option<Vec<u8>> {
        self.read_stream::<SolutionScope>(name.to_string(), expected)
            .await
    }

    pub async fn write_solution_stream(&self, name: &str, data: Vec<u8>, checksum: Option<Checksum>) -> bool {
        self.write_stream::<SolutionScope>(name.to_string(), data, checksum)
            .await
    }

    pub async fn read_project_checksum(&self, project: &ProjectKey, name: &str) -> Option<Checksum> {
        self.read_checksum::<ProjectScope>((project.clone(), name.to_string()))
            .await
    }

    pub async fn read_project_stream(
        &self,
        project: &ProjectKey,
        name: &str,
        expected: Option<Checksum>,
    ) -> Option<Vec<u8>> {
        self.read_stream::<ProjectScope>((project.clone(), name.to_string()), expected)
            .await
    }

    pub async fn write_project_stream(
        &self,
        project: &ProjectKey,
        name: &str,
        data: Vec<u8>,
        checksum: Option<Checksum>,
    ) -> bool {
        self.write_stream::<ProjectScope>((project.clone(), name.to_string()), data, checksum)
            .await
    }

    pub async fn read_document_checksum(&self, document: &DocumentKey, name: &str) -> Option<Checksum> {
        self.read_checksum::<DocumentScope>((document.clone(), name.to_string()))
            .await
    }

    pub async fn read_document_stream(
        &self,
        document: &DocumentKey,
        name: &str,
        expected: Option<Checksum>,
    ) -> Option<Vec<u8>> {
        self.read_stream::<DocumentScope>((document.clone(), name.to_string()), expected)
            .await
    }

    pub async fn write_document_stream(
        &self,
        document: &DocumentKey,
        name: &str,
        data: Vec<u8>,
        checksum: Option<Checksum>,
    ) -> bool {
        self.write_stream::<DocumentScope>((document.clone(), name.to_string()), data, checksum)
            .await
    }

    /// Run one flush now, on the exclusive scheduler.
    pub async fn flush_now(&self) -> Result<usize> {
        self.run_exclusive(|shared| shared.db.flush())
            .await
            .unwrap_or(Err(StorageError::ShuttingDown))
    }

    pub async fn stats(&self) -> Result<StorageStats> {
        self.run_read(|shared| shared.db.stats())
            .await
            .unwrap_or(Err(StorageError::ShuttingDown))
    }

    /// Flush everything and release the database.
    ///
    /// Waits for in-flight reads, writes and flushes, runs a final flush,
    /// closes all pooled connections and finally releases the folder lock.
    /// Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.shared.shutdown.send_replace(true) {
            return Ok(());
        }
        info!("Closing storage at {}", self.db_path().display());

        let gate = Arc::clone(&self.shared.write_gate);
        let permit = gate.acquire().await;
        let drained = self.shared.readers.write().await;
        let db = Arc::clone(&self.shared.db);
        let result = tokio::task::spawn_blocking(move || db.flush()).await;
        self.shared.write_gate.close();
        drop(permit);

        self.shared.db.shutdown();
        let lock = self
            .shared
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(lock);
        drop(drained);

        let moved = result??;
        debug!("Final flush moved {} rows", moved);
        Ok(())
    }
}

/// A store handed to callers: either a real database or a stand-in used when
/// the database could not be opened, so callers simply run uncached.
#[derive(Clone)]
pub enum PersistentStorage {
    Sqlite(SqliteStorage),
    NoOp,
}

impl PersistentStorage {
    pub fn is_available(&self) -> bool {
        matches!(self, PersistentStorage::Sqlite(_))
    }

    pub async fn read_solution_checksum(&self, name: &str) -> Option<Checksum> {
        match self {
            PersistentStorage::Sqlite(s) => s.read_solution_checksum(name).await,
            PersistentStorage::NoOp => None,
        }
    }

    pub async fn read_solution_stream(&self, name: &str, expected: Option<Checksum>) -> Option<Vec<u8>> {
        match self {
            PersistentStorage::Sqlite(s) => s.read_solution_stream(name, expected).await,
            PersistentStorage::NoOp => None,
        }
    }

    pub async fn write_solution_stream(&self, name: &str, data: Vec<u8>, checksum: Option<Checksum>) -> bool {
        match self {
            PersistentStorage::Sqlite(s) => s.write_solution_stream(name, data, checksum).await,
            PersistentStorage::NoOp => false,
        }
    }

    pub async fn read_project_checksum(&self, project: &ProjectKey, name: &str) -> Option<Checksum> {
        match self {
            PersistentStorage::Sqlite(s) => s.read_project_checksum(project, name).await,
            PersistentStorage::NoOp => None,
        }
    }

    pub async fn read_project_stream(
        &self,
        project: &ProjectKey,
        name: &str,
        expected: Option<Checksum>,
    ) -> Option<Vec<u8>> {
        match self {
            PersistentStorage::Sqlite(s) => s.read_project_stream(project, name, expected).await,
            PersistentStorage::NoOp => None,
        }
    }

    pub async fn write_project_stream(
        &self,
        project: &ProjectKey,
        name: &str,
        data: Vec<u8>,
        checksum: Option<Checksum>,
    ) -> bool {
        match self {
            PersistentStorage::Sqlite(s) => s.write_project_stream(project, name, data, checksum).await,
            PersistentStorage::NoOp => false,
        }
    }

    pub async fn read_document_checksum(&self, document: &DocumentKey, name: &str) -> Option<Checksum> {
        match self {
            PersistentStorage::Sqlite(s) => s.read_document_checksum(document, name).await,
            PersistentStorage::NoOp => None,
        }
    }

    pub async fn read_document_stream(
        &self,
        document: &DocumentKey,
        name: &str,
        expected: Option<Checksum>,
    ) -> Option<Vec<u8>> {
        match self {
            PersistentStorage::Sqlite(s) => s.read_document_stream(document, name, expected).await,
            PersistentStorage::NoOp => None,
        }
    }

    pub async fn write_document_stream(
        &self,
        document: &DocumentKey,
        name: &str,
        data: Vec<u8>,
        checksum: Option<Checksum>,
    ) -> bool {
        match self {
            PersistentStorage::Sqlite(s) => s.write_document_stream(document, name, data, checksum).await,
            PersistentStorage::NoOp => false,
        }
    }

    pub async fn close(&self) -> Result<()> {
        match self {
            PersistentStorage::Sqlite(s) => s.close().await,
            PersistentStorage::NoOp => Ok(()),
        }
    }
}

/// Hands out the store for a solution, reusing the open one while the same
/// solution is requested.
pub struct StorageService {
    options: StorageOptions,
    current: tokio::sync::Mutex<Option<(Option<String>, SqliteStorage)>>,
}

impl StorageService {
    pub fn new(options: StorageOptions) -> Self {
        Self {
            options,
            current: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn open_storage(&self, solution: SolutionInfo) -> PersistentStorage {
        let mut current = self.current.lock().await;
        if let Some((path, storage)) = current.as_ref() {
            if *path == solution.file_path && !storage.is_closed() {
                return PersistentStorage::Sqlite(storage.clone());
            }
        }
        if let Some((_, previous)) = current.take() {
            if let Err(err) = previous.close().await {
                warn!("Failed to close previous storage: {}", err);
            }
        }

        let path = solution.file_path.clone();
        match SqliteStorage::open(self.options.clone(), solution).await {
            Ok(storage) => {
                *current = Some((path, storage.clone()));
                PersistentStorage::Sqlite(storage)
            }
            Err(StorageError::AlreadyOpen(dir)) => {
                info!(
                    "Storage at {} is owned by another process, running without cache",
                    dir.display()
                );
                PersistentStorage::NoOp
            }
            Err(err) => {
                error!("Storage unavailable, running without cache: {}", err);
                if let Some(faults) = &self.options.faults {
                    faults.on_fatal_error(&err);
                }
                PersistentStorage::NoOp
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        let current = self.current.lock().await.take();
        match current {
            Some((_, storage)) => storage.close().await,
            None => Ok(()),
        }
    }
}
