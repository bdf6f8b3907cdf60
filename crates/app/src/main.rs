use bookwise_core::{
    ingest_folder, Backends, BookExtractor, CharacterNgramEmbedder, ConfigStore, Embedder, FileJobQueue,
    FsObjectStore, FsRegistry, ModelRouter, Neo4jStore, OllamaModel, OpenSearchStore, PipelineSettings, QdrantStore,
    QueryRequest, QueryResponse, RagConfig, RagConfigUpdate, RagService,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "bookwise", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// OpenSearch base URL
    #[arg(long, env = "BOOKWISE_OPENSEARCH_URL", default_value = "http://localhost:9200")]
    opensearch_url: String,

    /// OpenSearch index name
    #[arg(long, env = "BOOKWISE_OPENSEARCH_INDEX", default_value = "book_chunks")]
    opensearch_index: String,

    /// Qdrant base URL
    #[arg(long, env = "BOOKWISE_QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "BOOKWISE_QDRANT_COLLECTION", default_value = "book_chunks")]
    qdrant_collection: String,

    /// Neo4j HTTP endpoint
    #[arg(long, env = "BOOKWISE_NEO4J_URL", default_value = "http://localhost:7474")]
    neo4j_url: String,

    #[arg(long, env = "BOOKWISE_NEO4J_DB", default_value = "neo4j")]
    neo4j_db: String,

    #[arg(long, env = "BOOKWISE_NEO4J_USER", default_value = "neo4j")]
    neo4j_user: String,

    #[arg(long, env = "BOOKWISE_NEO4J_PASSWORD", default_value = "password")]
    neo4j_password: String,

    /// Ollama-compatible generation endpoint
    #[arg(long, env = "BOOKWISE_OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Model that writes answers
    #[arg(long, env = "BOOKWISE_OLLAMA_MODEL", default_value = "llama3.1")]
    ollama_model: String,

    /// Model that parses contents and index pages; defaults to the answer model
    #[arg(long, env = "BOOKWISE_PARSER_MODEL")]
    parser_model: Option<String>,

    /// Endpoint tried when the primary endpoint is unreachable
    #[arg(long, env = "BOOKWISE_FALLBACK_OLLAMA_URL")]
    fallback_ollama_url: Option<String>,

    /// Model served by the fallback endpoint; defaults to the answer model
    #[arg(long, env = "BOOKWISE_FALLBACK_MODEL")]
    fallback_model: Option<String>,

    /// Holds uploaded books, the document registry and the job queue.
    #[arg(long, env = "BOOKWISE_DATA_DIR", default_value = "./bookwise-data")]
    data_dir: PathBuf,

    /// DjVuLibre text extractor binary
    #[arg(long, env = "BOOKWISE_DJVUTXT", default_value = "djvutxt")]
    djvutxt: PathBuf,

    #[command(flatten)]
    rag: RagOverrides,
}

/// Optional start-up overrides, validated like any other configuration update.
#[derive(Args)]
struct RagOverrides {
    #[arg(long, env = "BOOKWISE_RETRIEVAL_TOP_K")]
    retrieval_top_k: Option<usize>,

    #[arg(long, env = "BOOKWISE_MIN_CHUNKS")]
    min_chunks: Option<usize>,

    #[arg(long, env = "BOOKWISE_CONFIDENCE_THRESHOLD")]
    confidence_threshold: Option<f64>,

    #[arg(long, env = "BOOKWISE_RELEVANCE_THRESHOLD")]
    relevance_threshold: Option<f64>,

    #[arg(long, env = "BOOKWISE_MAX_CONTEXT_LENGTH")]
    max_context_length: Option<usize>,

    #[arg(long, env = "BOOKWISE_TEMPERATURE")]
    temperature: Option<f64>,

    #[arg(long, env = "BOOKWISE_ENABLE_FALLBACK")]
    enable_fallback: Option<bool>,
}

impl RagOverrides {
    fn update(&self) -> RagConfigUpdate {
        RagConfigUpdate {
            retrieval_top_k: self.retrieval_top_k,
            min_chunks: self.min_chunks,
            confidence_threshold: self.confidence_threshold,
            relevance_threshold: self.relevance_threshold,
            max_context_length: self.max_context_length,
            temperature: self.temperature,
            enable_fallback: self.enable_fallback,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Upload every PDF/DjVu under a folder and queue it for ingestion.
    Ingest {
        #[arg(long)]
        folder: PathBuf,
        /// Process the queue in this process, retries included, until nothing is left.
        #[arg(long, default_value_t = false)]
        wait: bool,
    },
    /// Run ingestion workers until interrupted.
    Worker {
        /// Defaults to the pipeline's configured worker count.
        #[arg(long, env = "BOOKWISE_WORKERS")]
        workers: Option<usize>,
    },
    /// Ask a question; prints a cited answer or the fallback.
    Query {
        #[arg(long)]
        question: String,
        #[arg(long)]
        document_id: Option<String>,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Print a document's table of contents.
    Toc {
        #[arg(long)]
        document_id: String,
    },
    /// Print a document's alphabetical index.
    Index {
        #[arg(long)]
        document_id: String,
    },
    /// List registered documents and their status.
    Documents,
    /// List dead-lettered ingestion jobs.
    DeadLetters,
    /// Print the effective retrieval/generation configuration.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let service = build_service(&cli).await?;
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "bookwise boot"
    );

    match cli.command {
        Command::Ingest { folder, wait } => {
            let report = ingest_folder(&folder, service.ingestion()).await?;
            for skipped in &report.skipped {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped book");
            }
            for queued in &report.queued {
                println!("queued {} document_id={} job={}", queued.path.display(), queued.document_id, queued.job_id);
            }

            if wait {
                let drained = service.ingestion().drain_with_retries("cli").await?;
                println!(
                    "succeeded={} retry_scheduled={} dead_lettered={}",
                    drained.succeeded, drained.retried, drained.dead_lettered
                );
            }
        }
        Command::Worker { workers } => {
            let (stop, shutdown) = tokio::sync::watch::channel(false);
            let workers = workers.unwrap_or(service.ingestion().settings().workers);
            let handles = service.ingestion().spawn_workers(workers, shutdown);
            tokio::signal::ctrl_c().await?;
            info!("shutdown requested, letting in-flight jobs finish");
            stop.send(true)?;
            for handle in handles {
                handle.await?;
            }
        }
        Command::Query {
            question,
            document_id,
            top_k,
        } => {
            let request = QueryRequest {
                question,
                document_id,
                top_k,
            };
            match service.query(&request).await? {
                QueryResponse::Answer(answer) => {
                    println!("{}", answer.summary);
                    println!("confidence={:.2}", answer.confidence);
                    for claim in answer.claims {
                        println!("- {} [{} p.{}]", claim.text, claim.source, claim.page_number);
                    }
                }
                QueryResponse::Fallback(fallback) => {
                    println!("{}", fallback.message);
                    println!("reason: {}", fallback.reason);
                }
            }
        }
        Command::Toc { document_id } => {
            let toc = service.get_toc(&document_id).await?;
            if toc.is_empty() {
                println!("no table of contents for {document_id}");
            }
            for visit in toc.pre_order() {
                println!("{}{} ... {}", "  ".repeat(visit.depth), visit.node.title, visit.node.page);
            }
        }
        Command::Index { document_id } => {
            for entry in service.get_index(&document_id).await? {
                let pages: Vec<String> = entry.pages.iter().map(u32::to_string).collect();
                println!("{}, {}", entry.term, pages.join(", "));
            }
        }
        Command::Documents => {
            for document in service.documents().await? {
                println!(
                    "{} status={:?} title={} updated={}",
                    document.document_id,
                    document.status,
                    document.title,
                    document.updated_at.to_rfc3339()
                );
            }
        }
        Command::DeadLetters => {
            for record in service.dead_letters().await? {
                println!(
                    "job={} document_id={} stage={} attempts={} at={} error={}",
                    record.job_id,
                    record.document_id,
                    record.stage,
                    record.attempts,
                    record.dead_lettered_at.to_rfc3339(),
                    record.error
                );
            }
        }
        Command::Config => print_config(&service.get_config()),
    }

    Ok(())
}

fn model_router(cli: &Cli) -> ModelRouter {
    let parser_model = cli.parser_model.as_deref().unwrap_or(&cli.ollama_model);
    let router = ModelRouter::new(
        Arc::new(OllamaModel::new(&cli.ollama_url, parser_model)),
        Arc::new(OllamaModel::new(&cli.ollama_url, &cli.ollama_model)),
    );
    match &cli.fallback_ollama_url {
        Some(url) => {
            let model = cli.fallback_model.as_deref().unwrap_or(&cli.ollama_model);
            info!(url = %url, model, "fallback model configured");
            router.with_fallback(Arc::new(OllamaModel::new(url, model)))
        }
        None => router,
    }
}

async fn build_service(cli: &Cli) -> anyhow::Result<RagService> {
    let embedder = CharacterNgramEmbedder::default();
    let settings = PipelineSettings::default();

    let backends = Backends {
        objects: Arc::new(FsObjectStore::new(cli.data_dir.join("objects"))),
        registry: Arc::new(FsRegistry::open(cli.data_dir.join("registry.json")).await?),
        queue: Arc::new(FileJobQueue::open(cli.data_dir.join("queue.json")).await?),
        keyword: Arc::new(OpenSearchStore::new(&cli.opensearch_url, &cli.opensearch_index)),
        vectors: Arc::new(QdrantStore::new(
            &cli.qdrant_url,
            &cli.qdrant_collection,
            embedder.dimensions(),
        )),
        structures: Arc::new(Neo4jStore::new(
            &cli.neo4j_url,
            &cli.neo4j_db,
            &cli.neo4j_user,
            &cli.neo4j_password,
        )),
        models: model_router(cli),
        embedder: Arc::new(embedder),
        extractor: Arc::new(BookExtractor {
            djvutxt: cli.djvutxt.clone(),
            ..BookExtractor::default()
        }),
    };

    let config = ConfigStore::new(RagConfig::default())?;
    let overrides = cli.rag.update();
    if !overrides.is_empty() {
        config.set(&overrides)?;
    }

    Ok(RagService::new(backends, Arc::new(config), settings)?)
}

fn print_config(config: &RagConfig) {
    println!("retrieval_top_k={}", config.retrieval_top_k);
    println!("min_chunks={}", config.min_chunks);
    println!("confidence_threshold={}", config.confidence_threshold);
    println!("relevance_threshold={}", config.relevance_threshold);
    println!("max_context_length={}", config.max_context_length);
    println!("temperature={}", config.temperature);
    println!("enable_fallback={}", config.enable_fallback);
}
