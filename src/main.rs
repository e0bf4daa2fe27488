//! # Kenny CLI
//!
//! A thin front end over the engine's control surface. All real work —
//! ingestion, embedding, search, planning — happens in the library; this
//! binary parses arguments, builds an [`Engine`], and prints results.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use kenny::engine::{EmbedPassResult, Engine};
use kenny::models::{DocKind, IngestOptions, IngestReport, SearchFilters, Source};
use kenny::progress::ProgressMode;

#[derive(Parser)]
#[command(
    name = "kenny",
    about = "Kenny — a local-first personal data assistant",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/kenny.toml")]
    config: PathBuf,

    /// Progress output: auto, off, human, json
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize (or migrate) the database
    Init,

    /// Show corpus counts, embedding coverage, and cursors
    Status,

    /// Ingest data from the registered sources
    Ingest {
        /// Comma-separated sources (default: all registered)
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,

        /// Delete each selected source first and clear its cursor
        #[arg(long)]
        full: bool,

        /// Pull and canonicalize without writing
        #[arg(long)]
        dry_run: bool,

        /// Commit every N items
        #[arg(long)]
        batch_size: Option<usize>,

        /// Cap items per source
        #[arg(long)]
        max_items: Option<usize>,

        /// Stop a source at its first failed batch
        #[arg(long)]
        stop_on_batch_failure: bool,
    },

    /// Run one embedding pass (chunk rebuild + vector fill)
    Embed {
        /// Report would-be work without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Search the corpus
    Search {
        /// Search query
        query: String,

        /// Filter by source (repeatable, comma-separated)
        #[arg(long, value_delimiter = ',')]
        source: Vec<String>,

        /// Filter by kind (repeatable, comma-separated)
        #[arg(long, value_delimiter = ',')]
        kind: Vec<String>,

        /// Only results updated at or after this epoch second
        #[arg(long)]
        since: Option<i64>,

        /// Only results updated at or before this epoch second
        #[arg(long)]
        until: Option<i64>,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Ask a natural-language question
    Ask {
        /// The question
        text: String,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Retrieve a document by id
    Get {
        /// Document id
        doc_id: String,
    },

    /// Bulk-import archival chat exports
    ImportChatArchive {
        /// Pull and canonicalize without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    kenny::logging::init();

    let cli = Cli::parse();
    let config = kenny::config::load_config(&cli.config)?;
    let progress = match cli.progress.as_str() {
        "off" => ProgressMode::Off,
        "human" => ProgressMode::Human,
        "json" => ProgressMode::Json,
        _ => ProgressMode::default_for_tty(),
    }
    .reporter();

    let engine = Engine::open(config).await.map_err(|e| anyhow::anyhow!(e))?;

    let result = run(&engine, cli.command, progress).await;
    engine.close().await;
    result
}

async fn run(
    engine: &Engine,
    command: Commands,
    progress: Arc<dyn kenny::progress::ProgressReporter>,
) -> Result<()> {
    match command {
        Commands::Init => {
            // Opening the engine already applied pending migrations.
            println!("Database initialized at {}", engine.config().db.path.display());
        }

        Commands::Status => {
            let status = engine.status().await.map_err(|e| anyhow::anyhow!(e))?;
            println!("Kenny — corpus status");
            println!("=====================");
            println!();
            println!("  schema version: {}", status.schema_version);
            println!("  model:          {}", status.model_id);
            println!("  documents:      {}", status.documents_total);
            println!(
                "  embedded:       {} / {} chunks ({:.1}%)",
                status.chunks_embedded, status.chunks_total, status.embedding_coverage_pct
            );
            println!(
                "  adapters:       {}",
                status
                    .registered_sources
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            if !status.by_source.is_empty() {
                println!();
                println!(
                    "  {:<12} {:>8} {:>8} {:>10}   {}",
                    "SOURCE", "DOCS", "CHUNKS", "EMBEDDED", "CURSOR"
                );
                for s in &status.by_source {
                    println!(
                        "  {:<12} {:>8} {:>8} {:>10}   {}",
                        s.source.as_str(),
                        s.documents,
                        s.chunks,
                        s.embedded,
                        s.cursor_position.as_deref().unwrap_or("-")
                    );
                }
            }
        }

        Commands::Ingest {
            sources,
            full,
            dry_run,
            batch_size,
            max_items,
            stop_on_batch_failure,
        } => {
            let selected = parse_sources(&sources)?;
            let opts = IngestOptions {
                full_sync: full,
                batch_size: batch_size.unwrap_or(engine.config().ingest.batch_size),
                max_items,
                dry_run,
                continue_on_batch_failure: !stop_on_batch_failure,
            };
            let report = engine
                .ingest(&selected, &opts, progress)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            print_ingest_report(&report);
        }

        Commands::Embed { dry_run } => {
            match engine
                .embed_pass(dry_run, progress)
                .await
                .map_err(|e| anyhow::anyhow!(e))?
            {
                EmbedPassResult::DryRun(counts) => {
                    println!("embed (dry-run)");
                    println!("  stale documents: {}", counts.stale_documents);
                    println!("  pending chunks:  {}", counts.pending_chunks);
                }
                EmbedPassResult::AlreadyRunning => {
                    println!("embed: a pass is already running");
                }
                EmbedPassResult::Completed(report) => {
                    println!("embed pass {}", report.pass_id);
                    println!("  model:            {}", report.model_id);
                    println!("  purged (stale):   {}", report.purged_stale_embeddings);
                    println!("  rechunked docs:   {}", report.docs_rechunked);
                    println!("  embedded chunks:  {}", report.chunks_embedded);
                    println!("  deferred chunks:  {}", report.chunks_deferred);
                }
            }
        }

        Commands::Search {
            query,
            source,
            kind,
            since,
            until,
            limit,
        } => {
            let filters = SearchFilters {
                sources: parse_sources(&source)?,
                kinds: parse_kinds(&kind)?,
                time_range: match (since, until) {
                    (None, None) => None,
                    (from, to) => Some((from.unwrap_or(i64::MIN), to.unwrap_or(i64::MAX))),
                },
                participants: Vec::new(),
            };
            let limit = limit.unwrap_or(engine.config().retrieval.default_limit);
            let response = engine
                .search(&query, &filters, limit)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            print_hits(&response.hits, response.mode.as_str());
        }

        Commands::Ask { text, limit } => {
            let limit = limit.unwrap_or(engine.config().retrieval.default_limit);
            let result = engine
                .nl_query(&text, limit)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("plan: {}", serde_json::to_string(&result.plan)?);
            println!();
            print_hits(&result.hits, result.mode.as_str());
        }

        Commands::Get { doc_id } => {
            let fetched = engine
                .fetch_document(&doc_id)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            let doc = &fetched.document;
            println!("--- Document ---");
            println!("doc_id:      {}", doc.doc_id);
            println!("source:      {}", doc.source);
            println!("kind:        {}", doc.kind);
            println!("title:       {}", doc.title);
            println!("native id:   {}", doc.source_native_id);
            println!("updated_at:  {}", doc.updated_at);
            println!("metadata:    {}", doc.metadata);
            println!();
            println!("--- Content ---");
            println!("{}", doc.content);
            println!();
            println!("--- Typed fields ---");
            println!("{}", serde_json::to_string_pretty(&fetched.typed_fields)?);
        }

        Commands::ImportChatArchive { dry_run } => {
            let opts = IngestOptions {
                dry_run,
                batch_size: engine.config().ingest.batch_size,
                ..Default::default()
            };
            let report = engine
                .import_chat_archive(&opts, progress)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            print_ingest_report(&report);
        }
    }

    Ok(())
}

fn parse_sources(names: &[String]) -> Result<Vec<Source>> {
    names
        .iter()
        .filter(|n| !n.trim().is_empty())
        .map(|n| {
            Source::parse(n).ok_or_else(|| anyhow::anyhow!("unknown source: {n}"))
        })
        .collect()
}

fn parse_kinds(names: &[String]) -> Result<Vec<DocKind>> {
    names
        .iter()
        .filter(|n| !n.trim().is_empty())
        .map(|n| DocKind::parse(n).ok_or_else(|| anyhow::anyhow!("unknown kind: {n}")))
        .collect()
}

fn print_ingest_report(report: &IngestReport) {
    println!(
        "ingest run {}{}",
        report.run_id,
        if report.dry_run { " (dry-run)" } else { "" }
    );
    for (source, sr) in &report.sources {
        println!("  {}: {:?}", source, sr.status);
        println!(
            "    inserted {}  updated {}  unchanged {}  skipped {}  batches {}",
            sr.inserted, sr.updated, sr.unchanged, sr.skipped, sr.batches_committed
        );
        if let Some(cursor) = &sr.cursor_after {
            println!("    cursor: {cursor}");
        }
        for err in sr.errors.iter().take(10) {
            println!("    error [{}]: {}", err.native_id, err.reason);
        }
        if sr.errors.len() > 10 {
            println!("    … and {} more errors", sr.errors.len() - 10);
        }
    }
}

fn print_hits(hits: &[kenny::models::SearchHit], mode: &str) {
    if hits.is_empty() {
        println!("No results. (mode: {mode})");
        return;
    }
    println!("mode: {mode}");
    for (i, hit) in hits.iter().enumerate() {
        let title = if hit.title.is_empty() {
            "(untitled)"
        } else {
            hit.title.as_str()
        };
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            hit.score,
            hit.source,
            title
        );
        println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " "));
        println!(
            "    bm25: {:.3}  cosine: {:.3}  id: {}",
            hit.bm25, hit.cosine, hit.doc_id
        );
        println!();
    }
}
