use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use ragdigest::{SourceType, SummaryStyle};

#[derive(Debug, Parser)]
#[command(
    name = "ragdigest",
    about = "Build a knowledge base from long-form content and ask it questions"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// JSON config file (defaults to config.json in the data directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Dotenv file with API keys (defaults to .env when present)
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Chat provider used for answering and summarizing
    #[arg(long, global = true, value_enum, default_value_t = LlmChoice::Openai)]
    pub llm: LlmChoice,

    /// Override the chat model
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Embedding provider; a collection must always use the same one
    #[arg(long, global = true, value_enum, default_value_t = EmbeddingChoice::Hash)]
    pub embeddings: EmbeddingChoice,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LlmChoice {
    Openai,
    Groq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbeddingChoice {
    /// Offline feature hashing
    Hash,
    /// OpenAI text-embedding-3-small
    Openai,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load sources and add them to the knowledge base
    Ingest(IngestArgs),
    /// Ask a question across the indexed sources
    Ask(AskArgs),
    /// Summarize one source without indexing it
    Summarize(SummarizeArgs),
    /// Manage collections
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Inspect or remove indexed sources
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Paths of .txt or .md files
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Kind of content (news, video, pdf, generic)
    #[arg(short = 't', long = "type", default_value = "news")]
    pub source_type: SourceType,

    /// Ingest into this collection instead of the one for the type
    #[arg(short = 'c', long)]
    pub collection: Option<String>,

    /// Output reports as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question
    pub question: String,

    /// Kind of content to ask about (news, video, pdf, generic)
    #[arg(short = 't', long = "type", default_value = "news")]
    pub source_type: SourceType,

    /// Ask this collection instead of the one for the type
    #[arg(short = 'c', long)]
    pub collection: Option<String>,

    /// JSON file with previous turns: [{"role": "user", "content": "..."}]
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Output the answer as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Summarize --

#[derive(Debug, Parser)]
pub struct SummarizeArgs {
    /// Path of a .txt or .md file
    pub source: String,

    /// Kind of content (news, video, pdf, generic)
    #[arg(short = 't', long = "type", default_value = "news")]
    pub source_type: SourceType,

    /// Summary style (concise or detailed)
    #[arg(short, long, default_value = "concise")]
    pub style: SummaryStyle,

    /// Output the summary as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Collection subcommands --

#[derive(Debug, Subcommand)]
pub enum CollectionAction {
    /// List all collections
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show entry count, dimension and creation time
    Stats {
        /// Name of the collection
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every entry but keep the collection
    Clear {
        /// Name of the collection to clear
        name: String,
    },
    /// Remove a collection and all its indexed data
    Remove {
        /// Name of the collection to remove
        name: String,
    },
}

// -- Source subcommands --

#[derive(Debug, Subcommand)]
pub enum SourceAction {
    /// List the sources indexed in a collection
    List {
        /// Name of the collection
        collection: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every chunk of one source
    Remove {
        /// Name of the collection
        collection: String,
        /// Source id as shown by `source list`
        source_id: String,
    },
}

// -- Completions --

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
            "ragdigest",
            &mut std::io::stdout(),
        );
    }
}
