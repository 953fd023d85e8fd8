mod chat;
mod http;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use iris_config::AppConfig;
use iris_dialogue::{DialogueManager, TurnStore};
use iris_llm::{GenerateJson, OllamaClient};

#[derive(Debug, Parser)]
#[command(name = "iris", version, about = "Ophthalmology intake consultation engine")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP transport.
    Serve,
    /// Run an interactive consultation in the terminal.
    Chat {
        /// Resume a persisted consultation from its latest turn.
        #[arg(long)]
        resume: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let llm: Arc<dyn GenerateJson> =
        Arc::new(OllamaClient::new(config.llm.model.clone(), config.llm.base_url.clone()));
    let manager = Arc::new(DialogueManager::from_config(&config, llm)?);
    let store = Arc::new(TurnStore::new(&config.paths.output_dir));

    match cli.command {
        Commands::Serve => http::serve(&config.server.bind_addr, manager, store).await,
        Commands::Chat { resume } => chat::run(manager, store, resume).await,
    }
}
