use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod config;
pub mod init_config;
pub mod reset_session;
pub mod status;
pub mod version;

use config::{ConfigError, CourierConfig};

#[derive(Parser)]
#[command(name = "courier")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator CLI for the Courier session manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default config file with a freshly generated session key
    InitConfig {
        /// Config path (default: platform data dir)
        #[arg(long)]
        path: Option<String>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// List session rows and their current status
    Status {
        /// Path to config file (default: platform data dir)
        #[arg(long)]
        config: Option<String>,
    },

    /// Clear a session's stored credentials, forcing a fresh QR cycle
    ResetSession {
        /// Session id
        #[arg(long)]
        id: String,

        /// Path to config file (default: platform data dir)
        #[arg(long)]
        config: Option<String>,
    },

    /// Show version information
    Version,
}

/// Resolve the config path, load the file, and validate the session key.
fn load_config(path: Option<String>) -> Result<CourierConfig, ConfigError> {
    let path = match path {
        Some(p) => PathBuf::from(p),
        None => CourierConfig::default_path()?,
    };
    let config = CourierConfig::load(&path)?;
    config.session_key()?;
    Ok(config)
}

/// Initialize logging from config (stderr, or a file when configured).
fn init_logging(logging: &config::LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &logging.file {
        Some(path) => {
            if let Ok(file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                builder
                    .with_writer(std::sync::Arc::new(file))
                    .with_ansi(false)
                    .init();
            } else {
                builder.init();
            }
        }
        None => builder.init(),
    }
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::InitConfig { path, force } => init_config::execute(path, force),
        Commands::Status { config } => {
            let config = load_config(config)?;
            init_logging(&config.logging);
            status::execute(&config).await
        }
        Commands::ResetSession { id, config } => {
            let config = load_config(config)?;
            init_logging(&config.logging);
            reset_session::execute(&config, &id).await
        }
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}
