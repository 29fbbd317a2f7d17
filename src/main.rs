use std::{path::Path, sync::Arc};

use clap::Parser;
use ragdigest::{
    CollectionTarget, Conversation, DataDir, EmbeddingProvider, Error, HashEmbeddings,
    QueryOutcome, RagConfig, RagPipeline, Result, SourceDescriptor, SourceId, VectorDb,
    openai::{OpenAiChat, OpenAiEmbeddings, Vendor},
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{
    AskArgs, Cli, CollectionAction, Command, EmbeddingChoice, IngestArgs, LlmChoice,
    SourceAction, SummarizeArgs,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("RAGDIGEST_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// Load API keys and `RAGDIGEST_*` settings from a dotenv file: the one
/// given, else `.env` in the current directory or a parent. A missing
/// default file is fine; a missing explicit one is an error.
fn load_env_file(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path).map_err(|e| {
                Error::InvalidConfiguration(format!(
                    "cannot load env file {}: {e}",
                    path.display()
                ))
            })?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // Before tracing, so RAGDIGEST_LOG may come from the file.
    load_env_file(cli.env_file.as_deref())?;
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let store = Arc::new(VectorDb::open(&data_dir.index_db())?);

    match &cli.command {
        Command::Ingest(args) => cmd_ingest(&cli, &data_dir, store, args).await?,
        Command::Ask(args) => cmd_ask(&cli, &data_dir, store, args).await?,
        Command::Summarize(args) => {
            cmd_summarize(&cli, &data_dir, store, args).await?
        }
        Command::Collection { action } => match action {
            CollectionAction::List { json } => collection_list(&store, *json)?,
            CollectionAction::Stats { name, json } => {
                collection_stats(&store, name, *json)?
            }
            CollectionAction::Clear { name } => {
                let removed = store.clear_collection(name)?;
                println!("Cleared collection '{name}' ({removed} chunks removed)");
            }
            CollectionAction::Remove { name } => {
                if !store.delete_collection(name)? {
                    return Err(Error::CollectionNotFound(name.clone()));
                }
                println!("Removed collection '{name}'");
            }
        },
        Command::Source { action } => match action {
            SourceAction::List { collection, json } => {
                source_list(&store, collection, *json)?
            }
            SourceAction::Remove {
                collection,
                source_id,
            } => {
                let removed = store
                    .delete_source(collection, &SourceId::from(source_id.clone()))?;
                println!("Removed {removed} chunks of source {source_id} from '{collection}'");
            }
        },
        Command::Completions(_) => {}
    }

    Ok(())
}

/// Config file from `--config`, else `config.json` in the data directory if
/// present, then `RAGDIGEST_*` overrides.
fn load_config(cli: &Cli, data_dir: &DataDir) -> Result<RagConfig> {
    let default_path = data_dir.config_file();
    let path = cli
        .config
        .as_deref()
        .or_else(|| default_path.exists().then_some(default_path.as_path()));

    let config = match path {
        Some(path) => RagConfig::from_file(path)?,
        None => RagConfig::default(),
    };
    config.with_env_overrides()
}

fn build_pipeline(
    cli: &Cli,
    data_dir: &DataDir,
    store: Arc<VectorDb>,
    collection: Option<&str>,
    with_llm: bool,
) -> Result<RagPipeline> {
    let config = load_config(cli, data_dir)?;

    let embedder: Arc<dyn EmbeddingProvider> = match cli.embeddings {
        EmbeddingChoice::Hash => Arc::new(HashEmbeddings::default()),
        EmbeddingChoice::Openai => Arc::new(OpenAiEmbeddings::from_env(Vendor::OpenAi)?),
    };

    let mut builder = RagPipeline::builder()
        .config(config)
        .store(store)
        .embedder(embedder);

    if with_llm {
        let vendor = match cli.llm {
            LlmChoice::Openai => Vendor::OpenAi,
            LlmChoice::Groq => Vendor::Groq,
        };
        let mut chat = OpenAiChat::from_env(vendor)?;
        if let Some(model) = &cli.model {
            chat = chat.with_model(model);
        }
        builder = builder.llm(Arc::new(chat));
    }

    if let Some(name) = collection {
        builder = builder.collection(CollectionTarget::Named(name.to_string()));
    }

    builder.build()
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_ingest(
    cli: &Cli,
    data_dir: &DataDir,
    store: Arc<VectorDb>,
    args: &IngestArgs,
) -> Result<()> {
    let pipeline =
        build_pipeline(cli, data_dir, store, args.collection.as_deref(), false)?;
    let sources: Vec<SourceDescriptor> = args
        .sources
        .iter()
        .map(|s| SourceDescriptor::new(s, args.source_type))
        .collect();

    let results = pipeline.ingest_batch(&sources).await;
    let failed = results.iter().filter(|r| r.is_err()).count();

    if args.json {
        let rows: Vec<serde_json::Value> = sources
            .iter()
            .zip(&results)
            .map(|(source, result)| match result {
                Ok(report) => serde_json::json!({
                    "source": source.locator,
                    "ok": true,
                    "report": report,
                }),
                Err(e) => serde_json::json!({
                    "source": source.locator,
                    "ok": false,
                    "error": e.to_string(),
                }),
            })
            .collect();
        print_json(&rows)?;
    } else {
        for (source, result) in sources.iter().zip(&results) {
            match result {
                Ok(report) => {
                    println!(
                        "Indexed {} -> '{}': {} chunks added, {} already present ({})",
                        source.locator,
                        report.collection,
                        report.chunks_added,
                        report.skipped_duplicates,
                        report.title.as_deref().unwrap_or("untitled"),
                    );
                    if report.chunks_replaced > 0 {
                        println!(
                            "  content changed: replaced {} stale chunks",
                            report.chunks_replaced
                        );
                    }
                }
                Err(e) => println!("Failed {}: {e}", source.locator),
            }
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn read_history(path: &Path) -> Result<Conversation> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

async fn cmd_ask(
    cli: &Cli,
    data_dir: &DataDir,
    store: Arc<VectorDb>,
    args: &AskArgs,
) -> Result<()> {
    let pipeline =
        build_pipeline(cli, data_dir, store, args.collection.as_deref(), true)?;
    let history = args.history.as_deref().map(read_history).transpose()?;

    let outcome = pipeline
        .ask(&args.question, args.source_type, history.as_ref())
        .await?;

    if args.json {
        return print_json(&outcome);
    }

    match outcome {
        QueryOutcome::NoContentIndexed => {
            println!(
                "Nothing has been indexed in '{}' yet. Ingest some sources first.",
                pipeline.collection_for(args.source_type)
            );
        }
        QueryOutcome::NoRelevantMatch => {
            println!("No indexed content is relevant to that question.");
        }
        QueryOutcome::Answered(answer) => {
            println!("{}", answer.response.text.trim());
            if answer.response.is_degraded() {
                println!(
                    "\n(partial answer: {} of {} retrieved chunks could not be processed)",
                    answer.response.map_failed, answer.chunks_retrieved
                );
            }
            if !answer.references.is_empty() {
                println!("\nReferences:");
                for reference in &answer.references {
                    let title = reference.title.as_deref().unwrap_or("Unknown title");
                    match &reference.source {
                        Some(source) => println!("  - {title} ({source})"),
                        None => println!("  - {title}"),
                    }
                }
            }
        }
    }
    Ok(())
}

async fn cmd_summarize(
    cli: &Cli,
    data_dir: &DataDir,
    store: Arc<VectorDb>,
    args: &SummarizeArgs,
) -> Result<()> {
    let pipeline = build_pipeline(cli, data_dir, store, None, true)?;
    let source = SourceDescriptor::new(&args.source, args.source_type);
    let summary = pipeline.summarize(&source, args.style).await?;

    if args.json {
        return print_json(&summary);
    }

    if let Some(title) = &summary.title {
        println!("# {title}\n");
    }
    println!("{}", summary.response.text.trim());
    if summary.response.is_degraded() {
        println!(
            "\n(partial summary: {} of {} chunks could not be processed)",
            summary.response.map_failed, summary.chunks
        );
    }
    Ok(())
}

fn collection_list(store: &VectorDb, json: bool) -> Result<()> {
    let stats = store
        .list_collections()?
        .iter()
        .map(|name| store.stats(name))
        .collect::<Result<Vec<_>>>()?;

    if json {
        print_json(&stats)?;
    } else if stats.is_empty() {
        println!("No collections yet.");
    } else {
        for s in &stats {
            println!("{}\t{} chunks", s.name, s.count);
        }
    }
    Ok(())
}

fn collection_stats(store: &VectorDb, name: &str, json: bool) -> Result<()> {
    let stats = store.stats(name)?;
    if json {
        return print_json(&stats);
    }

    println!("Collection: {}", stats.name);
    println!("Chunks: {}", stats.count);
    match stats.dimension {
        Some(dimension) => println!("Dimension: {dimension}"),
        None => println!("Dimension: (not set)"),
    }
    println!("Created: {} (unix time)", stats.created_at);
    Ok(())
}

fn source_list(store: &VectorDb, collection: &str, json: bool) -> Result<()> {
    let sources = store.list_sources(collection)?;
    if json {
        return print_json(&sources);
    }

    if sources.is_empty() {
        println!("No sources in '{collection}'.");
    }
    for source in &sources {
        println!(
            "{}\t{}\t{} chunks\t{}",
            source.source_id,
            source.title.as_deref().unwrap_or("untitled"),
            source.chunks,
            source.source.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
