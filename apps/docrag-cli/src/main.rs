use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use docrag_core::config::{Config, Settings};
use docrag_core::loader::{list_files, load_document};
use docrag_core::types::{DocumentFilter, Query, RankedChunk, SourceDocument};
use docrag_mcp::McpServer;
use docrag_retrieval::{build_context, sources, Engine, IngestOutcome, IngestReport};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "docrag", about = "Local document retrieval: ingest, search and context assembly")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file; `<stem>.<env>.toml` next to it and `APP_*` variables are layered on top.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a file or every matching file under a directory.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Document id to use instead of the path-derived one (single file only).
        #[arg(long)]
        id: Option<String>,
    },
    /// Search the index.
    Search {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
        /// Restrict results to these document ids.
        #[arg(long = "doc")]
        docs: Vec<String>,
        /// Print results as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the numbered context block for a query.
    Context {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// List registered documents.
    Documents,
    /// Remove a document and its index entries.
    Remove { id: String },
    /// Regenerate index entries from the registry.
    Rebuild {
        /// Empty the vector and keyword indexes first (use after changing the embedding model).
        #[arg(long, default_value_t = false)]
        fresh: bool,
    },
    /// Train the approximate nearest-neighbour index.
    BuildAnn,
    /// Interactive search prompt.
    Interactive,
    /// Serve search, listing and ingestion as tools over stdio JSON-RPC.
    Mcp,
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let config = Config::load_from(path).with_context(|| format!("loading {}", path.display()))?;
    Ok(config.settings()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    let settings = load_settings(&cli.config)?;
    let engine = Engine::open(&settings).await.context("opening the index")?;
    info!(version = env!("CARGO_PKG_VERSION"), documents = engine.registry.len(), "docrag ready");
    if engine.needs_rebuild() && !matches!(cli.command, Commands::Rebuild { .. }) {
        warn!("some documents have no index entries; run `docrag rebuild` to restore them");
    }

    match cli.command {
        Commands::Ingest { paths, id } => ingest(&engine, &settings, &paths, id).await,
        Commands::Search { query, k, docs, json } => search(&engine, &query, k, docs, json).await,
        Commands::Context { query, k } => {
            let results = engine.retriever().retrieve(&build_query(&query, k, Vec::new())).await?;
            if results.is_empty() {
                println!("No results");
            } else {
                println!("{}", build_context(&results));
                println!("\nSources: {}", sources(&results).join(", "));
            }
            Ok(())
        }
        Commands::Documents => {
            for doc in engine.registry.list() {
                println!(
                    "{}  {:>5} chunks  {}  {}",
                    doc.id,
                    doc.chunk_count,
                    doc.ingested_at.format("%Y-%m-%d %H:%M:%S"),
                    doc.path
                );
            }
            Ok(())
        }
        Commands::Remove { id } => {
            if engine.ingestor().remove(&id).await? {
                println!("Removed {id}");
            } else {
                println!("{id} was not registered");
            }
            Ok(())
        }
        Commands::Rebuild { fresh } => {
            let report = if fresh { engine.ingestor().rebuild_fresh().await? } else { engine.ingestor().rebuild().await? };
            println!(
                "Rebuilt {} documents ({} entries, {} re-embedded, {} orphans removed)",
                report.documents,
                report.entries,
                report.embedded,
                report.reconcile.removed_orphans.len()
            );
            Ok(())
        }
        Commands::BuildAnn => {
            if engine.build_ann_index().await? {
                println!("ANN index built");
            } else {
                println!("Not enough entries to train an ANN index; exact search stays in use");
            }
            Ok(())
        }
        Commands::Interactive => interactive(&engine).await,
        Commands::Mcp => {
            let server = McpServer::new(Arc::new(engine));
            server.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
        }
    }
}

fn build_query(text: &str, k: Option<usize>, docs: Vec<String>) -> Query {
    let mut query = Query::new(text);
    query.k = k;
    if !docs.is_empty() {
        query = query.with_filter(DocumentFilter::new(docs));
    }
    query
}

async fn ingest(engine: &Engine, settings: &Settings, paths: &[PathBuf], id: Option<String>) -> anyhow::Result<()> {
    let mut files = Vec::new();
    for path in paths {
        let found = list_files(path, &settings.ingest.extensions);
        if found.is_empty() {
            warn!(path = %path.display(), extensions = ?settings.ingest.extensions, "no matching files");
        }
        files.extend(found);
    }
    files.sort();
    files.dedup();
    if files.is_empty() {
        anyhow::bail!("nothing to ingest");
    }
    if id.is_some() && files.len() > 1 {
        anyhow::bail!("--id can only be used when ingesting a single file");
    }

    let mut docs: Vec<SourceDocument> = Vec::with_capacity(files.len());
    for file in &files {
        match load_document(file) {
            Ok(mut doc) => {
                if let Some(id) = &id {
                    doc.id = id.clone();
                }
                docs.push(doc);
            }
            Err(e) => warn!(path = %file.display(), error = %e, "skipping unreadable file"),
        }
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; finishing in-flight commits");
                cancel.cancel();
            }
        });
    }

    let bar = ProgressBar::new(docs.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let reports = engine
        .ingestor()
        .ingest_many(docs, &cancel, |report: &IngestReport| {
            bar.set_message(report.path.clone());
            bar.inc(1);
        })
        .await;
    bar.finish_and_clear();

    let (mut ingested, mut unchanged, mut failed) = (0usize, 0usize, 0usize);
    for report in &reports {
        match &report.result {
            Ok(IngestOutcome::Ingested { chunks }) => {
                ingested += 1;
                println!("ingested  {}  {} chunks  {}", report.document_id, chunks, report.path);
            }
            Ok(IngestOutcome::Unchanged) => unchanged += 1,
            Ok(IngestOutcome::Empty) => println!("empty     {}  {}", report.document_id, report.path),
            Err(e) => {
                failed += 1;
                println!("failed    {}  {}: {e}", report.document_id, report.path);
            }
        }
    }
    println!("{ingested} ingested, {unchanged} unchanged, {failed} failed");
    if failed > 0 {
        anyhow::bail!("{failed} documents failed to ingest");
    }
    Ok(())
}

async fn search(engine: &Engine, text: &str, k: Option<usize>, docs: Vec<String>, json: bool) -> anyhow::Result<()> {
    let results = engine.retriever().retrieve(&build_query(text, k, docs)).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_results(&results);
    }
    Ok(())
}

fn print_results(results: &[RankedChunk]) {
    if results.is_empty() {
        println!("No results");
        return;
    }
    for (i, r) in results.iter().enumerate() {
        let source = r.path.as_deref().unwrap_or(&r.document_id);
        println!("{}. [{:.3}] {} (chunk {})", i + 1, r.score, source, r.chunk_index);
        let preview: String = r.text.chars().take(240).collect();
        println!("   {}", preview.replace('\n', " "));
    }
}

async fn interactive(engine: &Engine) -> anyhow::Result<()> {
    println!("Commands: /docs, /quit, or a query (prefix with '-k N' to change the result count)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("search> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else { break };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/q" | "q" | "quit" | "exit" => break,
            "/docs" => {
                for doc in engine.registry.list() {
                    println!("{}  {}", doc.id, doc.path);
                }
            }
            _ => {
                let (k, text) = parse_k(input);
                match engine.retriever().retrieve(&build_query(text, k, Vec::new())).await {
                    Ok(results) => print_results(&results),
                    Err(e) => println!("Search failed: {e}"),
                }
            }
        }
        println!();
    }
    Ok(())
}

fn parse_k(input: &str) -> (Option<usize>, &str) {
    let Some(rest) = input.strip_prefix("-k ") else { return (None, input) };
    let rest = rest.trim_start();
    let (n, tail) = rest.split_once(' ').unwrap_or((rest, ""));
    match n.parse() {
        Ok(k) => (Some(k), tail.trim()),
        Err(_) => (None, input),
    }
}
