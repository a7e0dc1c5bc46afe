use slnstore::db::Db;
use slnstore::storage::database_dir;
use slnstore::{
    Config, FaultInjector, InjectedFault, PersistentStorage, ProjectKey, SolutionInfo,
    SqliteStorage, StorageError, StorageOptions, StorageService,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

fn options(dir: &TempDir) -> StorageOptions {
    StorageOptions::new(dir.path()).with_config(Config {
        flush_delay_ms: 60_000,
        busy_timeout_secs: 1,
        ..Config::default()
    })
}

#[tokio::test]
async fn second_open_of_same_folder_is_refused() {
    let dir = TempDir::new().unwrap();
    let first = SqliteStorage::open(options(&dir), SolutionInfo::new("/s.sln"))
        .await
        .unwrap();

    let err = SqliteStorage::open(options(&dir), SolutionInfo::new("/s.sln"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, StorageError::AlreadyOpen(_)));

    first.close().await.unwrap();
    let again = SqliteStorage::open(options(&dir), SolutionInfo::new("/s.sln"))
        .await
        .unwrap();
    again.close().await.unwrap();
}

#[tokio::test]
async fn closed_storage_answers_with_absence() {
    let dir = TempDir::new().unwrap();
    let storage = SqliteStorage::open(options(&dir), SolutionInfo::new("/s.sln"))
        .await
        .unwrap();
    assert!(storage.write_solution_stream("a", vec![1], None).await);

    storage.close().await.unwrap();
    storage.close().await.unwrap();
    assert!(storage.is_closed());
    assert_eq!(storage.read_solution_stream("a", None).await, None);
    assert!(!storage.write_solution_stream("b", vec![2], None).await);
    assert!(matches!(
        storage.flush_now().await,
        Err(StorageError::ShuttingDown)
    ));
}

#[tokio::test]
async fn close_flushes_buffered_writes() {
    let dir = TempDir::new().unwrap();
    let storage = SqliteStorage::open(options(&dir), SolutionInfo::new("/s.sln"))
        .await
        .unwrap();
    assert!(storage.write_solution_stream("a", vec![1], None).await);
    storage.close().await.unwrap();

    // Read the tables directly so the recovery flush at open does not hide
    // a missing final flush.
    let db = Db::open(&database_dir(dir.path()), &Config::default(), None).unwrap();
    let stats = db.stats().unwrap();
    assert_eq!(stats.solution.main, 1);
    assert_eq!(stats.solution.write_cache, 0);
}

#[tokio::test]
async fn leftover_write_cache_rows_are_recovered_at_open() {
    let dir = TempDir::new().unwrap();
    {
        let db = Db::open(&database_dir(dir.path()), &Config::default(), None).unwrap();
        db.acquire()
            .unwrap()
            .execute(
                "INSERT INTO writecache.SolutionData3 (DataId, Checksum, Data) VALUES ('orphan', x'', x'2a')",
                [],
            )
            .unwrap();
    }

    let storage = SqliteStorage::open(options(&dir), SolutionInfo::new("/s.sln"))
        .await
        .unwrap();
    let stats = storage.stats().await.unwrap();
    assert_eq!(stats.solution.main, 1);
    assert_eq!(stats.solution.write_cache, 0);
    storage.close().await.unwrap();
}

#[tokio::test]
async fn interned_ids_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let project = ProjectKey::new("/p", "P");

    let storage = SqliteStorage::open(options(&dir), SolutionInfo::new("/s.sln"))
        .await
        .unwrap();
    assert!(
        storage
            .write_project_stream(&project, "sym", vec![1], None)
            .await
    );
    let strings = storage.stats().await.unwrap().strings;
    assert_eq!(strings, 4);
    storage.close().await.unwrap();

    let reopened = SqliteStorage::open(options(&dir), SolutionInfo::new("/s.sln"))
        .await
        .unwrap();
    assert_eq!(
        reopened.read_project_stream(&project, "sym", None).await,
        Some(vec![1])
    );
    assert!(
        reopened
            .write_project_stream(&project, "sym", vec![2], None)
            .await
    );
    let stats = reopened.stats().await.unwrap();
    assert_eq!(stats.strings, strings);
    assert_eq!(stats.project.main + stats.project.write_cache, 2);
    reopened.close().await.unwrap();
}

/// Fails the first `remaining` connection attempts and counts swallowed errors.
#[derive(Default)]
struct FlakyConnections {
    remaining: AtomicUsize,
    fatal: AtomicUsize,
}

impl FaultInjector for FlakyConnections {
    fn on_new_connection(&self) -> Result<(), InjectedFault> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(());
        }
        self.remaining.store(left - 1, Ordering::SeqCst);
        Err(InjectedFault("connection refused".into()))
    }

    fn on_fatal_error(&self, _err: &StorageError) {
        self.fatal.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn failed_open_releases_the_lock() {
    let dir = TempDir::new().unwrap();
    let faults = Arc::new(FlakyConnections {
        remaining: AtomicUsize::new(usize::MAX),
        ..FlakyConnections::default()
    });

    let result = SqliteStorage::open(
        options(&dir).with_faults(faults.clone()),
        SolutionInfo::new("/s.sln"),
    )
    .await;
    assert!(result.is_err());

    let storage = SqliteStorage::open(options(&dir), SolutionInfo::new("/s.sln"))
        .await
        .unwrap();
    storage.close().await.unwrap();
}

#[tokio::test]
async fn service_falls_back_to_noop_when_unavailable() {
    let dir = TempDir::new().unwrap();
    let faults = Arc::new(FlakyConnections {
        remaining: AtomicUsize::new(usize::MAX),
        ..FlakyConnections::default()
    });
    let service = StorageService::new(options(&dir).with_faults(faults.clone()));

    let storage = service.open_storage(SolutionInfo::new("/s.sln")).await;
    assert!(matches!(storage, PersistentStorage::NoOp));
    assert!(!storage.write_solution_stream("a", vec![1], None).await);
    assert_eq!(storage.read_solution_stream("a", None).await, None);
    assert_eq!(faults.fatal.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn service_reuses_store_for_same_solution() {
    let dir = TempDir::new().unwrap();
    let service = StorageService::new(options(&dir));

    let first = service.open_storage(SolutionInfo::new("/s.sln")).await;
    assert!(first.is_available());
    assert!(first.write_solution_stream("a", vec![1], None).await);

    let second = service.open_storage(SolutionInfo::new("/s.sln")).await;
    assert_eq!(second.read_solution_stream("a", None).await, Some(vec![1]));

    // Another service on the same folder cannot take the lock.
    let rival = StorageService::new(options(&dir));
    let blocked = rival.open_storage(SolutionInfo::new("/s.sln")).await;
    assert!(!blocked.is_available());

    // Switching solutions closes the old store and reopens the folder.
    let other = service.open_storage(SolutionInfo::new("/other.sln")).await;
    assert!(other.is_available());
    assert_eq!(first.read_solution_stream("a", None).await, None);
    assert_eq!(other.read_solution_stream("a", None).await, Some(vec![1]));

    service.close().await.unwrap();
    assert!(rival.open_storage(SolutionInfo::new("/s.sln")).await.is_available());
    rival.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_during_reads_hands_over_a_quiet_folder() {
    let dir = TempDir::new().unwrap();
    let project = ProjectKey::new("/p", "P");
    let storage = SqliteStorage::open(options(&dir), SolutionInfo::new("/s.sln"))
        .await
        .unwrap();
    assert!(
        storage
            .write_project_stream(&project, "sym", vec![5; 4096], None)
            .await
    );

    let mut readers = Vec::new();
    for _ in 0..16 {
        let storage = storage.clone();
        let project = project.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..20 {
                let read = storage.read_project_stream(&project, "sym", None).await;
                assert!(read.is_none() || read == Some(vec![5; 4096]));
            }
        }));
    }
    storage.close().await.unwrap();

    // Nothing of the closed store may still be open once the lock is free.
    let reopened = SqliteStorage::open(options(&dir), SolutionInfo::new("/s.sln"))
        .await
        .unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(
        reopened.read_project_stream(&project, "sym", None).await,
        Some(vec![5; 4096])
    );
    reopened.close().await.unwrap();
}
