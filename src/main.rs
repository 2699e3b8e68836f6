use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use journey_telemetry::{
    cli::{execute_command, JourneyCommands},
    config::{Config, LogFormat},
    storage::{FileJourneyStore, JourneyStore},
};

/// Inspect and maintain recorded request journeys.
#[derive(Parser, Debug)]
#[command(name = "journey", version, about)]
struct Cli {
    /// Journey log directory (overrides JOURNEY_LOG_DIR)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: JourneyCommands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(dir) = cli.log_dir {
        config.storage.log_dir = dir;
    }

    init_logging(&config);

    debug!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %config.storage.log_dir.display(),
        "Journey CLI starting"
    );

    let store: Arc<dyn JourneyStore> = Arc::new(FileJourneyStore::from_config(&config.storage));
    let result = execute_command(cli.command, store, &config).await;

    if result.exit_code == 0 {
        print!("{}", result.message);
    } else {
        eprintln!("{}", result.message);
    }
    std::process::exit(result.exit_code);
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
