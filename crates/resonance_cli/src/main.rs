use anyhow::Context;
use clap::{Parser, Subcommand};
use resonance_core::{MemoryType, ReconstructRequest, ResonanceConfig, RouteRequest};
use resonance_memory::{BasinRegistry, MemoryRouter, ReconstructionEngine, SqliteStore};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "resonance", author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "RESONANCE_CONFIG", default_value = "resonance.toml")]
    config: PathBuf,

    /// Path to the SQLite database (overrides the config file)
    #[arg(short, long)]
    db: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild working context for an identity and print it as JSON
    Reconstruct {
        /// Identity path, usually the project directory
        #[arg(long)]
        path: String,

        /// Identity name
        #[arg(long)]
        name: String,

        #[arg(long)]
        device: Option<String>,

        #[arg(long)]
        session: Option<String>,

        /// Retrieval cue; repeat for several
        #[arg(long = "cue")]
        cues: Vec<String>,

        /// JSON file holding an array of already-fetched tasks
        #[arg(long)]
        tasks: Option<PathBuf>,

        /// Print only the rendered digest
        #[arg(long)]
        digest: bool,
    },

    /// Classify content, activate its basin and store it
    Route {
        /// Content to route
        content: String,

        /// Memory type; classified from the content when omitted
        #[arg(long = "type", value_parser = parse_memory_type)]
        memory_type: Option<MemoryType>,

        #[arg(long)]
        source_id: Option<String>,
    },

    /// List basins, strongest first
    Basins,
}

fn parse_memory_type(s: &str) -> Result<MemoryType, String> {
    MemoryType::parse_str(s)
        .ok_or_else(|| format!("unknown memory type '{}' (episodic, semantic, procedural, strategic)", s))
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_prefetched(path: &Path) -> anyhow::Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tasks file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Tasks file {} is not a JSON array", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging(args.log_json);

    let mut config = ResonanceConfig::load_or_default(&args.config);
    if let Some(db) = args.db {
        config.store.db_path = db;
    }

    info!("Opening store at {}", config.store.db_path);
    let store = Arc::new(SqliteStore::new(&config.store.db_path).await?);

    let output = match args.command {
        Command::Reconstruct {
            path,
            name,
            device,
            session,
            cues,
            tasks,
            digest,
        } => {
            let prefetched_tasks = tasks.as_deref().map(read_prefetched).transpose()?;
            let request = ReconstructRequest {
                identity_path: path,
                identity_name: name,
                device_id: device,
                session_id: session,
                cues,
                prefetched_tasks,
            };
            let engine = ReconstructionEngine::from_store(store, &config);
            let response = engine.reconstruct(&request).await;
            if digest {
                print!("{}", response.memory.digest);
                return Ok(());
            }
            serde_json::to_string_pretty(&response)?
        }
        Command::Route {
            content,
            memory_type,
            source_id,
        } => {
            let registry = Arc::new(BasinRegistry::new(store.clone(), config.basin.clone()));
            let router = MemoryRouter::new(registry).with_sink(store);
            let result = router
                .route(&RouteRequest {
                    content,
                    memory_type,
                    source_id,
                })
                .await;
            serde_json::to_string_pretty(&result)?
        }
        Command::Basins => {
            let registry = BasinRegistry::new(store, config.basin.clone());
            let basins = registry.basins().await?;
            serde_json::to_string_pretty(&basins)?
        }
    };

    println!("{}", output);
    Ok(())
}
