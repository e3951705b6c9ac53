//! buildsync CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "buildsync")]
#[command(about = "Synchronize build requests with a remote CI service", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a synchronization configuration
    Validate {
        /// Path to the configuration file
        #[arg(long, default_value = "buildsync.json")]
        config: PathBuf,
        /// Catalog snapshot the configuration refers to
        #[arg(long)]
        catalog: PathBuf,
    },
    /// Poll the remote service and schedule pending build requests
    Poll {
        /// Remote CI service URL
        #[arg(long, env = "BUILDSYNC_REMOTE_URL", default_value = "http://localhost:8010")]
        remote: String,
        /// Path to the configuration file
        #[arg(long, default_value = "buildsync.json")]
        config: PathBuf,
        /// Catalog snapshot with the build requests to schedule
        #[arg(long)]
        catalog: PathBuf,
        /// Number of recent builds fetched per builder
        #[arg(long, default_value = "5")]
        count: usize,
        /// Seconds between cycles
        #[arg(long, default_value = "60")]
        interval: u64,
        /// Run a single cycle and print its report
        #[arg(long)]
        once: bool,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Validate { config, catalog } => {
            commands::validate::run(&config, &catalog)?;
        }
        Commands::Poll {
            remote,
            config,
            catalog,
            count,
            interval,
            once,
        } => {
            let options = commands::poll::PollOptions {
                remote,
                config,
                catalog,
                count,
                interval,
                once,
            };
            commands::poll::run(options).await?;
        }
    }

    Ok(())
}
