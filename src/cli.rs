use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "kbase",
    about = "Manage a local retrieval knowledge base",
    version
)]
pub struct Cli {
    /// Storage directory (overrides KB_STORAGE_PATH and the XDG default)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Embedding model ID, local model path, or hash:<dims>
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Chunk size in characters
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Overlap between adjacent chunks in characters
    #[arg(long, global = true)]
    pub chunk_overlap: Option<usize>,

    /// Storage backend: files or redb
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add files or directories to the knowledge base
    Add(AddArgs),
    /// Add raw text under a document id
    AddText(AddTextArgs),
    /// Delete a document and all of its chunks
    Delete {
        /// Document id
        id: String,
    },
    /// List stored documents
    List(ListArgs),
    /// Find the chunks most similar to a query
    Query(QueryArgs),
    /// Include a document in query results again
    Enable {
        /// Document id
        id: String,
    },
    /// Exclude a document from query results without deleting it
    Disable {
        /// Document id
        id: String,
    },
    /// Rebuild the vector index, re-extracting sources where possible
    Rebuild(JsonArgs),
    /// Show engine status
    Status(JsonArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// Files or directories (walked recursively)
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Document id to use instead of the file name (single file only)
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Debug, Parser)]
pub struct AddTextArgs {
    /// Document id
    pub id: String,

    /// Text to add, or `-` to read standard input
    pub text: String,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Glob pattern applied to document ids
    #[arg(short, long)]
    pub pattern: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The query text
    pub text: String,

    /// Number of results (defaults to the configured top-k)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "kbase",
            &mut std::io::stdout(),
        );
    }
}
