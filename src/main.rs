//! assetcache: cache the assets of recorded web sessions
//!
//! Reads cache requests, fetches the referenced scripts, stylesheets and
//! nested resources, and stores them in object storage.

mod commands;

use anyhow::Result;
use assetcache::config::{Config, LogFormat, LoggingConfig, DEFAULT_CONFIG_FILE};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "assetcache")]
#[command(about = "Cache the assets of recorded web sessions in object storage")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve cache requests read from stdin, one JSON object per line
    Run,

    /// Cache a single asset and wait for it and its nested references
    Cache {
        /// Asset URL
        url: String,

        /// Owning session id
        #[arg(short, long, required_unless_present = "script")]
        session: Option<u64>,

        /// Cache as a session-independent script
        #[arg(long, conflicts_with = "session")]
        script: bool,
    },

    /// Write a default configuration file
    Init {
        /// Where to write the configuration
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { path, force } = &cli.command {
        init_logging(&LoggingConfig::default(), cli.verbose)?;
        return commands::init::init_config(path, *force);
    }

    let config = load_config(&cli.config)?;
    init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Run => commands::run::run(config).await,
        Commands::Cache { url, session, script } => {
            commands::cache::cache_once(config, url, session, script).await
        }
        Commands::Init { .. } => Ok(()),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        anyhow::bail!(
            "Config file '{}' not found; create one with `assetcache init`",
            path.display()
        );
    }
    Config::load(path)
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_logging(config: &LoggingConfig, verbose: u8) -> Result<()> {
    let level = config.level.with_verbosity(verbose);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    match config.format {
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .json()
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
