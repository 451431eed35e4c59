//! reviews - Corpus management for the game-review retrieval store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use review_core::{Embedder, Record, ReviewConfig, ScopeFilter, Store};
use review_embed::{MockEmbedder, OnnxEmbedder};
use review_ingest::Indexer;
use review_store::SqliteStore;

/// reviews - Build and inspect the game-review Q&A store
#[derive(Parser)]
#[command(name = "reviews")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: <config_dir>/reviews-rag/config.toml or ./reviews-rag.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config and REVIEWS_DB_PATH)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Index a ground-truth JSON file
    Index {
        /// Path to ground_truth_retrieval.json
        path: PathBuf,

        /// Use the deterministic hashing embedder instead of the ONNX model
        #[arg(long)]
        mock_embedder: bool,
    },

    /// Show statistics
    Stats {
        /// Game title to get stats for (all if not specified)
        #[arg(long)]
        scope: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List indexed games and their record counts
    Scopes,

    /// Print records of one game, of one Steam app id, or of the whole store
    Inspect {
        /// Game title
        #[arg(long, conflicts_with = "appid")]
        scope: Option<String>,

        /// Steam application id
        #[arg(long)]
        appid: Option<String>,

        /// Maximum number of records
        #[arg(short, long, default_value = "10")]
        limit: u32,

        /// Print record ids only
        #[arg(long)]
        ids: bool,
    },

    /// Delete every record of one game
    Delete {
        /// Game title
        #[arg(long)]
        scope: String,
    },
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(
    path: Option<&Path>,
    database: Option<PathBuf>,
) -> Result<ReviewConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => ReviewConfig::load(path)?,
        None => ReviewConfig::load_default()?,
    };
    config.apply_env_overrides();
    if let Some(database) = database {
        config.database.path = database;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.database)?;

    match cli.command {
        Commands::Init => {
            let store = SqliteStore::open_with_config(&config.database)?;
            println!(
                "Initialized database at: {} (dimension {})",
                config.database.path.display(),
                store.dimension()
            );
        }
        Commands::Index {
            path,
            mock_embedder,
        } => {
            let store = Arc::new(open_store(&config)?);
            if mock_embedder {
                let embedder = MockEmbedder::with_config(
                    config.database.dimension,
                    config.embedding.max_tokens,
                );
                index(store, Arc::new(embedder), &config, &path).await?;
            } else {
                let embedder = OnnxEmbedder::from_config(&config.embedding)?;
                index(store, Arc::new(embedder), &config, &path).await?;
            }
        }
        Commands::Stats { scope, json } => {
            let store = open_store(&config)?;
            let filter = scope
                .as_deref()
                .map(|s| ScopeFilter::new(Some(s)))
                .transpose()?;
            let stats = store.get_stats(filter.as_ref()).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Database: {}", config.database.path.display());
                if let Some(scope) = &stats.filter {
                    println!("Scope: {}", scope);
                }
                println!("Records: {}", stats.records);
                println!("Scopes: {}", stats.scopes);
                println!("Vector dimension: {}", stats.dimension);
                println!("Storage: {} bytes", stats.storage_bytes);
            }
        }
        Commands::Scopes => {
            let store = open_store(&config)?;
            let scopes = store.list_scopes().await?;
            if scopes.is_empty() {
                println!("No scopes found.");
            } else {
                println!("Found {} scopes:\n", scopes.len());
                for (scope, count) in scopes {
                    println!("- {} ({} records)", scope, count);
                }
            }
        }
        Commands::Inspect {
            scope,
            appid,
            limit,
            ids,
        } => {
            let store = open_store(&config)?;
            let records = match (scope, appid) {
                (_, Some(appid)) => store.list_by_app_id(&appid, limit).await?,
                (Some(scope), None) => {
                    let filter = ScopeFilter::new(Some(&scope))?;
                    store.list_records(&filter, limit, 0).await?
                }
                (None, None) => store.list_all(limit).await?,
            };
            print_records(&records, ids);
        }
        Commands::Delete { scope } => {
            let store = open_store(&config)?;
            let filter = ScopeFilter::new(Some(&scope))?;
            let deleted = store.delete_scope(&filter).await?;
            println!("Deleted {} records from '{}'", deleted, scope);
        }
    }

    Ok(())
}

fn open_store(config: &ReviewConfig) -> Result<SqliteStore, Box<dyn std::error::Error>> {
    if !config.database.path.exists() {
        eprintln!(
            "Database not found at {}. Run 'reviews init' first, or specify a path with -d.",
            config.database.path.display()
        );
        std::process::exit(1);
    }

    Ok(SqliteStore::open_with_config(&config.database)?)
}

async fn index<E: Embedder>(
    store: Arc<SqliteStore>,
    embedder: Arc<E>,
    config: &ReviewConfig,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let indexer = Indexer::new(store, embedder, &config.ingest)?;

    println!("Indexing {}...", path.display());
    let report = indexer.index_file(path).await?;

    println!(
        "\nComplete: {} entries, {} inserted, {} duplicates, {} skipped (no title)",
        report.entries, report.inserted, report.duplicates, report.skipped
    );

    Ok(())
}

fn print_records(records: &[Record], ids_only: bool) {
    if records.is_empty() {
        println!("No records found.");
        return;
    }

    for record in records {
        if ids_only {
            println!("{}", record.id);
            continue;
        }
        println!(
            "{} [{}] appid={} section={}",
            record.id, record.scope_key, record.provenance.appid, record.section
        );
        println!("  Q: {}", record.question);
        println!("  A: {}", record.answer);
    }
}
