use chrono::Utc;
use clap::{Parser, Subcommand};
use docrank_core::{
    delete_document, ingest_file, ingest_folder_best_effort, load_table_set, CharacterNgramEmbedder,
    Embedder, EngineError, FallbackController, HttpEmbedder, IngestionOptions, LocalVectorIndex,
    QdrantVectorIndex, QueryAnswerer, RetrievalConfig, RetrievalPipeline, SourceType, TableCache,
    TableQuery, TableSession, ValidationError, VectorIndex,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docrank", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory for the local index snapshot and the table cache.
    #[arg(long, env = "DOCRANK_DATA_DIR", default_value = "./data/vector_db")]
    data_dir: PathBuf,

    /// Qdrant base URL. The local index is used when unset.
    #[arg(long, env = "DOCRANK_QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant collection
    #[arg(long, default_value = "documents")]
    qdrant_collection: String,

    /// OpenAI-compatible embeddings endpoint. The offline trigram embedder is
    /// used when unset.
    #[arg(long, env = "DOCRANK_EMBEDDING_URL")]
    embedding_url: Option<String>,

    #[arg(long, env = "DOCRANK_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    #[arg(long, default_value = "1536")]
    embedding_dimensions: usize,

    /// Results below this similarity are dropped.
    #[arg(long, env = "DOCRANK_SIMILARITY_THRESHOLD", default_value = "0.3")]
    similarity_threshold: f64,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a file or, recursively, every supported file in a folder.
    Ingest {
        path: PathBuf,
        /// Source name to record instead of the file name (single files only).
        #[arg(long)]
        source_name: Option<String>,
    },
    /// Retrieve chunks and print the assembled context.
    Search {
        query: String,
        #[arg(long)]
        k: Option<usize>,
        /// Restrict to a document id (`source` or `source#sheet`). Repeatable.
        #[arg(long = "source")]
        sources: Vec<String>,
        #[arg(long)]
        source_type: Option<SourceType>,
    },
    /// List indexed documents grouped by type.
    Documents,
    /// Delete a document's chunks and cached tables.
    Delete { id: String },
    Stats,
    /// Rank the sheets of a CSV or workbook against a question.
    Sheets {
        path: PathBuf,
        query: String,
        #[arg(long, default_value = "3")]
        top: usize,
    },
    /// Run a JSON table query on one sheet.
    TableQuery {
        path: PathBuf,
        /// JSON plan, e.g. {"op":"filter","where":[...]}
        plan: String,
        /// Sheet to query; the first sheet when unset.
        #[arg(long)]
        sheet: Option<String>,
    },
    /// Try a JSON table query on each sheet, best match first, until one
    /// gives a conclusive answer.
    Ask {
        query: String,
        plan: String,
        /// Workbook or CSV to load. Repeatable.
        #[arg(long = "file")]
        files: Vec<PathBuf>,
        /// Also search every table in the cache.
        #[arg(long, default_value_t = false)]
        cached: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "docrank boot"
    );

    if let Err(error) = run(cli).await {
        error!(%error, details = ?error, "command failed");
        anyhow::bail!(error.public_message());
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), EngineError> {
    let cache = TableCache::open(cli.data_dir.join("tables")).await?;

    match cli.command {
        Command::Sheets { path, query, top } => {
            let set = load_blocking(path).await?;
            let ranked = set.rank_sheets(&query, top);
            for score in set.score_sheets(&query) {
                if ranked.contains(&score.sheet_name) {
                    println!("{:.4}  {}", score.relevance, score.sheet_name);
                }
            }
            Ok(())
        }
        Command::TableQuery { path, plan, sheet } => {
            let plan = TableQuery::from_json(&plan)?;
            let set = load_blocking(path).await?;
            let active = match sheet.as_deref() {
                Some(sheet) => set.switch(sheet)?,
                None => set.default_sheet().ok_or_else(|| ValidationError::SheetNotFound {
                    sheet: "default".to_string(),
                    available: Vec::new(),
                })?,
            };
            let output = docrank_core::execute(active.table(), &plan)?;
            println!("[{}]", active.sheet_name());
            println!("{}", output.render());
            Ok(())
        }
        Command::Ask {
            query,
            plan,
            files,
            cached,
        } => {
            let plan = TableQuery::from_json(&plan)?;
            let mut session = if cached {
                TableSession::load_from_cache(&cache).await?
            } else {
                TableSession::new()
            };
            for path in files {
                session.load(load_blocking(path).await?);
            }
            if session.is_empty() {
                return Err(ValidationError::InvalidArgument(
                    "no tables loaded; pass --file or --cached".to_string(),
                )
                .into());
            }

            let controller = FallbackController::new(QueryAnswerer::new(plan));
            let answer = controller.answer(session.iter(), &query).await?;
            println!(
                "[{} / {}] after {} attempt(s)",
                answer.set_name, answer.sheet_name, answer.attempts
            );
            println!("{}", answer.response);
            Ok(())
        }
        command => {
            let embedder = build_embedder(
                cli.embedding_url.as_deref(),
                &cli.embedding_model,
                cli.embedding_api_key,
                cli.embedding_dimensions,
            )?;
            let config = RetrievalConfig {
                similarity_threshold: cli.similarity_threshold,
                ..RetrievalConfig::default()
            };
            match cli.qdrant_url {
                Some(url) => {
                    let index = QdrantVectorIndex::connect(url, cli.qdrant_collection, embedder).await?;
                    run_indexed(command, RetrievalPipeline::with_config(index, config), &cache).await
                }
                None => {
                    let index = LocalVectorIndex::open(&cli.data_dir, embedder).await?;
                    run_indexed(command, RetrievalPipeline::with_config(index, config), &cache).await
                }
            }
        }
    }
}

fn build_embedder(
    url: Option<&str>,
    model: &str,
    api_key: Option<String>,
    dimensions: usize,
) -> Result<Arc<dyn Embedder>, EngineError> {
    let embedder: Arc<dyn Embedder> = match url {
        Some(url) => Arc::new(HttpEmbedder::new(url, model, api_key, dimensions)?),
        None => Arc::new(CharacterNgramEmbedder::default()),
    };
    Ok(embedder)
}

async fn load_blocking(path: PathBuf) -> Result<docrank_core::TableSet, EngineError> {
    tokio::task::spawn_blocking(move || load_table_set(&path))
        .await
        .map_err(|error| docrank_core::ProcessingError::Io(std::io::Error::other(error)))?
}

async fn run_indexed<I>(command: Command, pipeline: RetrievalPipeline<I>, cache: &TableCache) -> Result<(), EngineError>
where
    I: VectorIndex,
{
    let index = pipeline.index();
    match command {
        Command::Ingest { path, source_name } => {
            let options = IngestionOptions::default();
            if path.is_dir() {
                if source_name.is_some() {
                    warn!("--source-name is ignored for folders");
                }
                let report = ingest_folder_best_effort(index, Some(cache), &path, &options).await?;
                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
                }
                let chunks: usize = report.ingested.iter().map(|summary| summary.chunk_ids.len()).sum();
                println!(
                    "{} chunks ingested from {} file(s), {} skipped",
                    chunks,
                    report.ingested.len(),
                    report.skipped_files.len()
                );
            } else {
                let summary = ingest_file(index, Some(cache), &path, source_name.as_deref(), &options).await?;
                println!(
                    "{} chunks ingested from {} at {}",
                    summary.chunk_ids.len(),
                    summary.source,
                    Utc::now().to_rfc3339()
                );
            }
        }
        Command::Search {
            query,
            k,
            sources,
            source_type,
        } => {
            let sources = pipeline.validate_filter_sources(&sources).await?;
            let filter = (!sources.is_empty()).then_some(sources.as_slice());
            let results = pipeline.retrieve(&query, k, filter, source_type).await?;
            let (context, references) = pipeline.build_context(&results);

            println!("query: {query}");
            for result in &results {
                println!(
                    "[{}] similarity={:.4} chunk={}",
                    result.metadata.document_key(),
                    result.similarity().unwrap_or_default(),
                    result.id
                );
            }
            if results.is_empty() {
                println!("no relevant documents found");
            } else {
                println!("context:\n{context}");
                println!("references: {}", references.join(", "));
            }
        }
        Command::Documents => {
            for (source_type, documents) in pipeline.available_sources().await? {
                println!("{source_type}:");
                for document in documents {
                    match (document.rows, document.columns) {
                        (Some(rows), Some(columns)) => println!(
                            "  {} chunks={} rows={rows} columns={columns}",
                            document.id, document.chunk_count
                        ),
                        _ => println!("  {} chunks={}", document.id, document.chunk_count),
                    }
                }
            }
        }
        Command::Delete { id } => {
            let deleted = delete_document(index, Some(cache), &id).await?;
            if deleted == 0 {
                println!("no chunks found for {id}");
            } else {
                println!("deleted {deleted} chunks for {id}");
            }
        }
        Command::Stats => {
            let stats = pipeline.document_stats().await?;
            println!("documents: {}", stats.unique_documents);
            println!("chunks: {}", stats.total_chunks);
            for (source_type, count) in &stats.by_type {
                println!("  type {source_type}: {count}");
            }
            for (strategy, count) in &stats.by_chunking_strategy {
                println!("  strategy {strategy}: {count}");
            }
        }
        Command::Sheets { .. } | Command::TableQuery { .. } | Command::Ask { .. } => {}
    }
    Ok(())
}
