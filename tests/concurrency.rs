use slnstore::{
    Checksum, Config, DocumentKey, ProjectInfo, ProjectKey, SolutionInfo, SqliteStorage,
    StorageOptions,
};
use tempfile::TempDir;

fn solution(projects: usize, documents: usize) -> SolutionInfo {
    let mut solution = SolutionInfo::new("/s.sln");
    for p in 0..projects {
        let key = ProjectKey::new(format!("/src/p{p}/p{p}.csproj"), format!("P{p}"));
        let documents = (0..documents)
            .map(|d| DocumentKey::new(&key, format!("/src/p{p}/f{d}.cs"), format!("f{d}.cs")))
            .collect();
        solution.projects.push(ProjectInfo { key, documents });
    }
    solution
}

async fn open(dir: &TempDir, solution: SolutionInfo, flush_delay_ms: u64) -> SqliteStorage {
    let options = StorageOptions::new(dir.path()).with_config(Config {
        flush_delay_ms,
        ..Config::default()
    });
    SqliteStorage::open(options, solution).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_writers_and_readers_see_their_own_writes() {
    let dir = TempDir::new().unwrap();
    let solution = solution(3, 10);
    let documents: Vec<DocumentKey> = solution
        .projects
        .iter()
        .flat_map(|p| p.documents.clone())
        .collect();
    let storage = open(&dir, solution, 5).await;

    let mut tasks = Vec::new();
    for (i, document) in documents.into_iter().enumerate() {
        let storage = storage.clone();
        tasks.push(tokio::spawn(async move {
            let data = vec![i as u8; 64];
            let checksum = Checksum::of(&data);
            assert!(
                storage
                    .write_document_stream(&document, "syntax", data.clone(), Some(checksum.clone()))
                    .await
            );
            let read = storage
                .read_document_stream(&document, "syntax", Some(checksum))
                .await;
            assert_eq!(read, Some(data));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    storage.flush_now().await.unwrap();
    let stats = storage.stats().await.unwrap();
    assert_eq!(stats.document.main, 30);
    assert_eq!(stats.document.write_cache, 0);
    storage.close().await.unwrap();

    let reopened = open(&dir, SolutionInfo::new("/s.sln"), 60_000).await;
    let stats = reopened.stats().await.unwrap();
    assert_eq!(stats.document.main, 30);
    assert_eq!(stats.document.write_cache, 0);
    reopened.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_of_a_key_interns_once() {
    let dir = TempDir::new().unwrap();
    let storage = open(&dir, SolutionInfo::new("/s.sln"), 60_000).await;

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let storage = storage.clone();
        tasks.push(tokio::spawn(async move {
            // Every task builds its own handle for the same project.
            let project = ProjectKey::new("/p", "P");
            storage
                .write_project_stream(&project, "sym", vec![i], None)
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap());
    }

    let stats = storage.stats().await.unwrap();
    // "/p", "P", the composite project id and "sym".
    assert_eq!(stats.strings, 4);
    assert_eq!(stats.project.write_cache, 1);
    storage.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bulk_population_at_open_covers_the_snapshot() {
    let dir = TempDir::new().unwrap();
    let storage = open(&dir, solution(2, 5), 60_000).await;

    // Per project: path, name and composite id. Per document: path and
    // composite id. The five file names are shared by both projects.
    let stats = storage.stats().await.unwrap();
    assert_eq!(stats.strings, 2 * 3 + 2 * 5 * 2 + 5);
    storage.close().await.unwrap();
}
