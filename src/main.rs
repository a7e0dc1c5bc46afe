use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;
use slnstore::storage::{SqliteStorage, StorageOptions};
use slnstore::{Checksum, Config, SolutionInfo, logging};
use std::io::{Read, Write};
use std::path::PathBuf;

mod cli;

use cli::{Command, KeyArgs, StoreArgs, Target};

async fn open(store: &StoreArgs) -> Result<SqliteStorage> {
    let options = StorageOptions::new(&store.working).with_config(Config::from_env());
    let solution = SolutionInfo {
        file_path: store.solution.clone(),
        projects: Vec::new(),
    };
    SqliteStorage::open(options, solution)
        .await
        .with_context(|| format!("open storage in {}", store.working.display()))
}

async fn read_checksum(storage: &SqliteStorage, key: &KeyArgs) -> Option<Checksum> {
    match key.target() {
        Target::Solution => storage.read_solution_checksum(&key.name).await,
        Target::Project(project) => storage.read_project_checksum(&project, &key.name).await,
        Target::Document(document) => storage.read_document_checksum(&document, &key.name).await,
    }
}

async fn read_stream(
    storage: &SqliteStorage,
    key: &KeyArgs,
    expected: Option<Checksum>,
) -> Option<Vec<u8>> {
    match key.target() {
        Target::Solution => storage.read_solution_stream(&key.name, expected).await,
        Target::Project(project) => {
            storage
                .read_project_stream(&project, &key.name, expected)
                .await
        }
        Target::Document(document) => {
            storage
                .read_document_stream(&document, &key.name, expected)
                .await
        }
    }
}

async fn write_stream(
    storage: &SqliteStorage,
    key: &KeyArgs,
    data: Vec<u8>,
    checksum: Option<Checksum>,
) -> bool {
    match key.target() {
        Target::Solution => storage.write_solution_stream(&key.name, data, checksum).await,
        Target::Project(project) => {
            storage
                .write_project_stream(&project, &key.name, data, checksum)
                .await
        }
        Target::Document(document) => {
            storage
                .write_document_stream(&document, &key.name, data, checksum)
                .await
        }
    }
}

fn read_input(input: Option<&PathBuf>) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    match input {
        Some(path) => {
            data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        }
        None => {
            std::io::stdin()
                .read_to_end(&mut data)
                .context("read stdin")?;
        }
    }
    Ok(data)
}

fn write_output(output: Option<&PathBuf>, data: &[u8]) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, data).with_context(|| format!("write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(data)?;
            stdout.flush()?;
            Ok(())
        }
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Stats { store } => {
            let storage = open(&store).await?;
            let stats = storage.stats().await;
            storage.close().await?;
            println!("{}", serde_json::to_string_pretty(&stats?)?);
        }
        Command::Flush { store } => {
            let storage = open(&store).await?;
            let moved = storage.flush_now().await;
            storage.close().await?;
            println!("{}", json!({ "flushed": moved? }));
        }
        Command::Read {
            store,
            key,
            checksum,
            output,
        } => {
            let storage = open(&store).await?;
            let data = read_stream(&storage, &key, checksum.as_deref().map(Checksum::from)).await;
            storage.close().await?;
            let Some(data) = data else {
                bail!("no stream named {:?} with a matching checksum", key.name);
            };
            write_output(output.as_ref(), &data)?;
        }
        Command::Write {
            store,
            key,
            checksum,
            input,
        } => {
            let data = read_input(input.as_ref())?;
            let len = data.len();
            let storage = open(&store).await?;
            let written = write_stream(&storage, &key, data, checksum.as_deref().map(Checksum::from)).await;
            storage.close().await?;
            if !written {
                bail!("stream {:?} was not stored", key.name);
            }
            println!("{}", json!({ "name": key.name, "bytes": len }));
        }
        Command::Checksum { store, key } => {
            let storage = open(&store).await?;
            let checksum = read_checksum(&storage, &key).await;
            storage.close().await?;
            let value = match checksum {
                Some(checksum) => json!({
                    "hex": checksum.to_hex(),
                    "text": String::from_utf8_lossy(checksum.as_bytes()),
                }),
                None => serde_json::Value::Null,
            };
            println!("{}", json!({ "name": key.name, "checksum": value }));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    logging::init(args.verbose);
    run(args.command).await
}
