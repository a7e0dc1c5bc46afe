use clap::{Args as ClapArgs, Parser, Subcommand};
use slnstore::{DocumentKey, ProjectKey};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "slnstore",
    version,
    about = "Checksum-addressed solution storage",
    after_help = r#"Examples:
  slnstore stats --working .cache
  slnstore write --working .cache --name index --input index.bin --checksum v1
  slnstore read --working .cache --name index --checksum v1 --output index.bin
  slnstore checksum --working .cache --name sym --project-path /p --project-name P
  slnstore read --working .cache --name sym --project-path /p --project-name P \
    --document-path /p/d.cs --document-name D
  slnstore flush --working .cache
"#
)]
pub struct Args {
    /// Log at debug level (overridden by SLNSTORE_LOG).
    #[arg(long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print row counts of every table as JSON.
    Stats {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Migrate buffered writes into the main tables and exit.
    Flush {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Read a stream to a file or stdout.
    Read {
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        key: KeyArgs,
        /// Only return the stream if its stored checksum matches.
        #[arg(long)]
        checksum: Option<String>,
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Write a stream from a file or stdin.
    Write {
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long)]
        checksum: Option<String>,
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,
    },
    /// Print the stored checksum of a stream.
    Checksum {
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        key: KeyArgs,
    },
}

#[derive(ClapArgs)]
pub struct StoreArgs {
    /// Working folder; the database lives in its sqlite3/ subfolder.
    #[arg(long, default_value = ".")]
    pub working: PathBuf,
    /// Solution file path the store is opened for.
    #[arg(long)]
    pub solution: Option<String>,
}

#[derive(ClapArgs)]
pub struct KeyArgs {
    /// Stream name.
    #[arg(long)]
    pub name: String,
    #[arg(long, requires = "project_name")]
    pub project_path: Option<String>,
    #[arg(long, requires = "project_path")]
    pub project_name: Option<String>,
    #[arg(long, requires_all = ["project_path", "document_name"])]
    pub document_path: Option<String>,
    #[arg(long, requires_all = ["project_path", "document_path"])]
    pub document_name: Option<String>,
}

/// The entity a stream belongs to.
pub enum Target {
    Solution,
    Project(ProjectKey),
    Document(DocumentKey),
}

impl KeyArgs {
    pub fn target(&self) -> Target {
        let (Some(path), Some(name)) = (&self.project_path, &self.project_name) else {
            return Target::Solution;
        };
        let project = ProjectKey::new(path.as_str(), name.as_str());
        match (&self.document_path, &self.document_name) {
            (Some(path), Some(name)) => {
                Target::Document(DocumentKey::new(&project, path.as_str(), name.as_str()))
            }
            _ => Target::Project(project),
        }
    }
}
