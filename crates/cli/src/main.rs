//! Parley CLI entry point.
//!
//! Commands:
//! - `onboard`: write a default config file
//! - `chat`: interactive chat or single-message mode

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use parley_config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Parley: streaming chat with local language models",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of ~/.parley/config.toml
    #[arg(short, long, global = true, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Onboard,

    /// Chat with the configured model
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Continue a conversation from its transcript
        #[arg(short, long)]
        resume: Option<String>,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => AppConfig::load().context("Failed to load config"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    match cli.command {
        Commands::Onboard => commands::onboard::run(cli.config)?,
        Commands::Chat { message, resume } => {
            let config = load_config(cli.config.as_ref())?;
            commands::chat::run(config, message, resume).await?
        }
    }

    Ok(())
}
