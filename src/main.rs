#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod analyzer;
mod chunker;
mod config;
mod context;
mod embedder;
mod error;
mod indexer;
mod languages;
mod models;
mod ports;
mod resilience;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::KestrelConfig;
use context::{AssembleContextCommand, ContextAssembler};
use embedder::FastembedProvider;
use indexer::{IndexCodebaseCommand, IndexerService};
use languages::{LanguageRegistry, SupportedLanguage};
use models::ProjectRecord;
use ports::MetadataStore;
use storage::{LanceVectorStore, SqliteStorage};

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(about = "Retrieval-augmented context engine for AI code review", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level filter (e.g. debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a codebase into the vector and metadata stores
    Index {
        /// Codebase root directory
        path: PathBuf,
        /// Explicit project id (defaults to a hash of the root path)
        #[arg(long)]
        project: Option<String>,
        /// Force one language for every file instead of per-extension resolution
        #[arg(long)]
        language: Option<String>,
        /// Lines per chunk (defaults to the language profile)
        #[arg(long)]
        chunk_size: Option<u32>,
        /// Overlapping lines between chunks (defaults to the language profile)
        #[arg(long)]
        chunk_overlap: Option<u32>,
        /// Re-index every file regardless of checksums
        #[arg(short, long)]
        force: bool,
    },

    /// Assemble review context for one source file
    Review {
        /// File to review
        file: PathBuf,
        /// Project root the file belongs to
        #[arg(long, default_value = ".")]
        project_root: PathBuf,
        /// Explicit project id (matches the one used at index time)
        #[arg(long)]
        project: Option<String>,
        /// Language override (defaults to extension resolution)
        #[arg(long)]
        language: Option<String>,
        /// Number of similar chunks to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Show metadata-store statistics and provider health
    Stats,

    /// List supported language profiles
    Languages,

    /// Search indexed functions by name substring
    SearchFunctions {
        /// Substring to match against function names
        query: String,
    },
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn open_stores(
    config: &KestrelConfig,
    vector_dim: usize,
) -> anyhow::Result<(SqliteStorage, Arc<LanceVectorStore>)> {
    let sqlite = SqliteStorage::new(
        config
            .storage
            .sqlite_path()
            .to_str()
            .context("storage path is not valid UTF-8")?,
    )
    .await?;
    sqlite.migrate().await?;

    let lance = LanceVectorStore::new(
        config
            .storage
            .lance_path()
            .to_str()
            .context("storage path is not valid UTF-8")?,
        vector_dim,
    )
    .await?;

    Ok((sqlite, Arc::new(lance)))
}

fn parse_language(name: Option<&str>) -> anyhow::Result<Option<SupportedLanguage>> {
    match name {
        None => Ok(None),
        Some(name) => SupportedLanguage::from_name(name)
            .map(Some)
            .with_context(|| format!("unsupported language: {name}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let cwd = std::env::current_dir()?;
    let config = KestrelConfig::load(&cwd)?;

    match cli.command {
        Commands::Index {
            path,
            project,
            language,
            chunk_size,
            chunk_overlap,
            force,
        } => {
            let embedder = Arc::new(FastembedProvider::new(&config.embedding)?);
            let (sqlite, lance) = open_stores(&config, embedder.dimension()).await?;
            let languages = Arc::new(LanguageRegistry::builtin());

            let sqlite = Arc::new(sqlite);
            let service = IndexerService::new(
                sqlite.clone(),
                lance,
                sqlite,
                embedder,
                languages,
                config.retry.policy(),
            )
            .with_parallel_files(config.indexer.parallel_files)
            .with_max_file_bytes(config.indexer.max_file_bytes)
            .with_extra_ignores(config.indexer.ignore.clone());

            let command = IndexCodebaseCommand {
                root_path: path,
                project_id: project,
                language: parse_language(language.as_deref())?,
                chunk_size,
                chunk_overlap,
                force_reindex: force,
            };
            let report = service.index(command).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Review {
            file,
            project_root,
            project,
            language,
            top_k,
        } => {
            // A missing input file is fatal; degraded retrieval below is not.
            let snippet = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;

            let root = project_root
                .canonicalize()
                .with_context(|| format!("cannot resolve {}", project_root.display()))?;
            let project_id = project
                .unwrap_or_else(|| ProjectRecord::derive_id(&root.to_string_lossy()));
            let collection = ProjectRecord::collection_for(&project_id);

            let languages = LanguageRegistry::builtin();
            let language = match parse_language(language.as_deref())? {
                Some(language) => language,
                None => {
                    let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("");
                    languages
                        .resolve(ext)
                        .map(|p| p.language)
                        .with_context(|| format!("no language profile for .{ext}"))?
                }
            };

            let relative = file
                .canonicalize()
                .ok()
                .and_then(|f| f.strip_prefix(&root).ok().map(|p| p.to_path_buf()))
                .unwrap_or_else(|| file.clone());

            let embedder = Arc::new(FastembedProvider::new(&config.embedding)?);
            let (sqlite, lance) = open_stores(&config, embedder.dimension()).await?;

            let assembler = ContextAssembler::new(
                lance,
                Arc::new(sqlite),
                embedder,
                config.retry.policy(),
                collection,
            );
            let context = assembler
                .assemble(AssembleContextCommand {
                    file_path: relative.to_string_lossy().replace('\\', "/"),
                    code_snippet: snippet,
                    language: language.as_str().to_string(),
                    top_k_similar: top_k.unwrap_or(config.review.top_k_similar),
                })
                .await;

            tracing::info!(complete = context.is_complete(), "context assembled");
            println!("{}", serde_json::to_string_pretty(&context)?);
        }

        Commands::Stats => {
            let embedder = Arc::new(FastembedProvider::new(&config.embedding)?);
            let (sqlite, _lance) = open_stores(&config, embedder.dimension()).await?;

            let stats = sqlite.statistics().await?;
            let provider_healthy = {
                use ports::EmbeddingProvider as _;
                embedder.health_check().await
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "metadata": stats,
                    "metadata_store_healthy": sqlite.health_check().await.is_ok(),
                    "embedding_provider_healthy": provider_healthy,
                }))?
            );
        }

        Commands::Languages => {
            let languages = LanguageRegistry::builtin();
            let profiles: Vec<_> = languages
                .profiles()
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "language": p.language.as_str(),
                        "extensions": p.extensions,
                        "chunk_size": p.chunk_size,
                        "chunk_overlap": p.chunk_overlap,
                        "vulnerability_categories": p.vulnerability_categories,
                        "system_prompt_id": p.system_prompt_id,
                        "validation_prompt_id": p.validation_prompt_id,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&profiles)?);
        }

        Commands::SearchFunctions { query } => {
            let embedder = Arc::new(FastembedProvider::new(&config.embedding)?);
            let (sqlite, _lance) = open_stores(&config, embedder.dimension()).await?;

            let hits = sqlite.search_functions(&query).await?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
    }

    Ok(())
}
