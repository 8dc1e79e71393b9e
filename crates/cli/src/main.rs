//! Convoke operator binary.
//!
//! Commands:
//! - `chat`    Send one message through the assistant
//! - `memory`  List, add or search a scope's memories
//! - `doctor`  Check configuration and stored state

use clap::{Parser, Subcommand};
use convoke_config::AppConfig;

mod commands;

use commands::local::OPERATOR;

#[derive(Parser)]
#[command(
    name = "convoke",
    about = "Convoke: conversational assistant orchestration",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this DB file instead of the configured one
    #[arg(long, global = true, env = "CONVOKE_DATA_PATH")]
    data: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single message and print the reply
    Chat {
        #[arg(short, long)]
        message: String,

        #[arg(long, default_value_t = 1)]
        scope: u64,

        #[arg(long, default_value_t = OPERATOR)]
        actor: u64,

        #[arg(long, default_value_t = 0)]
        channel: u64,
    },

    /// Manage memories
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },

    /// Check configuration and stored state
    Doctor,
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// List every memory in a scope
    List {
        #[arg(long, default_value_t = 1)]
        scope: u64,
    },

    /// Embed and store a memory
    Add {
        name: String,
        text: String,

        #[arg(long, default_value_t = 1)]
        scope: u64,

        /// Replace an existing memory with the same name
        #[arg(long)]
        overwrite: bool,
    },

    /// Rank memories against a query
    Search {
        query: String,

        #[arg(long, default_value_t = 1)]
        scope: u64,

        /// How many results to show
        #[arg(short)]
        k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(path) = cli.data {
        config.storage.path = Some(path);
    }

    match cli.command {
        Commands::Chat {
            message,
            scope,
            actor,
            channel,
        } => commands::chat::run(config, message, scope, actor, channel).await?,
        Commands::Memory { command } => match command {
            MemoryCommands::List { scope } => commands::memory::list(config, scope).await?,
            MemoryCommands::Add {
                name,
                text,
                scope,
                overwrite,
            } => commands::memory::add(config, scope, &name, &text, overwrite).await?,
            MemoryCommands::Search { query, scope, k } => {
                commands::memory::search(config, scope, &query, k).await?
            }
        },
        Commands::Doctor => commands::doctor::run(config).await?,
    }

    Ok(())
}
