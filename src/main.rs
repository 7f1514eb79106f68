//! docent CLI entry point

use clap::{Parser, Subcommand};
use docent::answer::{AnswerRequest, RagRouter};
use docent::config::Config;
use docent::embed::{Embedder, HttpEmbedder};
use docent::error::Result;
use docent::ingest::IngestPipeline;
use docent::llm::{Generator, HttpGenerator};
use docent::server::{self, AppState};
use docent::store::VectorStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docent")]
#[command(version, about = "Document QA RAG service", long_about = None)]
struct Cli {
    /// Path to config file (or its directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Bind host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Ingest a local file without going through HTTP
    Ingest {
        /// Path to the document
        file: PathBuf,
    },

    /// Ask one question from the command line
    Query {
        /// The question
        question: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = load_config(cli.config)?;
    let state = build_state(config).await?;

    match cli.command {
        Commands::Serve { host, port } => {
            let mut state = state;
            if host.is_some() || port.is_some() {
                let mut config = (*state.config).clone();
                if let Some(host) = host {
                    config.server.host = host;
                }
                if let Some(port) = port {
                    config.server.port = port;
                }
                state.config = Arc::new(config);
            }
            server::serve(Arc::new(state)).await?;
        }

        Commands::Ingest { file } => {
            let bytes = std::fs::read(&file)?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "upload".to_string());

            let report = state.pipeline.ingest(&bytes, &name, "").await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Query { question, json } => {
            let response = state
                .router
                .answer(AnswerRequest {
                    question,
                    ..Default::default()
                })
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}\n", response.answer);
                for source in &response.sources {
                    println!(
                        "  [{:.3}] {} (page {})",
                        source.sim,
                        source.filename,
                        source
                            .page
                            .map(|p| p.to_string())
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) if path.is_file() => Config::load(&path),
        Some(dir) => Config::load_from(Some(dir)),
        None => Config::load_from(None),
    }
}

async fn build_state(config: Config) -> Result<AppState> {
    let config = Arc::new(config);

    let store = Arc::new(
        VectorStore::open(&config.paths.db_file, config.embedding.dimension).await?,
    );
    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(&config.embedding)?);
    let generator: Arc<dyn Generator> = Arc::new(HttpGenerator::new(&config.generation)?);

    let pipeline = Arc::new(IngestPipeline::new(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::clone(&embedder),
    )?);
    let router = Arc::new(RagRouter::new(
        Arc::clone(&config),
        Arc::clone(&store),
        embedder,
        generator,
    ));

    Ok(AppState {
        config,
        store,
        pipeline,
        router,
    })
}
