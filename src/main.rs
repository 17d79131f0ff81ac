//! ignition-rs - first-boot configuration acquisition
//!
//! Races the config sources of a platform and writes the winning raw config
//! to a file or stdout for the provisioning stages that follow.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use ignition_rs::config::load_settings;
use ignition_rs::providers::sources_for;
use ignition_rs::{Platform, fetch_config};

#[derive(Parser)]
#[command(name = "ignition-rs")]
#[command(author, version, about = "First-boot configuration acquisition", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Settings file (default: /etc/ignition-rs/acquire.yaml if present)
    #[arg(short, long, env = "IGNITION_RS_SETTINGS")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire the config and write it out
    Fetch {
        /// Platform whose sources to race (openstack, file)
        #[arg(short, long, env = "IGNITION_RS_PLATFORM")]
        platform: Platform,

        /// Override the race deadline, in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Write the config here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the sources a platform would race
    Sources {
        #[arg(short, long, env = "IGNITION_RS_PLATFORM")]
        platform: Platform,
    },
}

fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // Logs go to stderr so stdout can carry the config.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut settings = load_settings(cli.config.as_deref())
        .await
        .context("Failed to load settings")?;

    match cli.command {
        Commands::Fetch {
            platform,
            timeout,
            output,
        } => {
            if let Some(timeout) = timeout {
                settings.timeout_secs = timeout;
            }

            let acquisition = fetch_config(platform, &settings).await?;
            if acquisition.is_empty() {
                info!("No config found; continuing with an empty config");
                return Ok(());
            }

            if let Some(source) = acquisition.source() {
                info!("Acquired config from {}", source);
            }
            let config = acquisition.into_bytes();

            match output {
                Some(path) => tokio::fs::write(&path, &config)
                    .await
                    .with_context(|| format!("Failed to write config to {}", path.display()))?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&config).await?;
                    stdout.flush().await?;
                }
            }
        }
        Commands::Sources { platform } => {
            for source in sources_for(platform, &settings)? {
                println!("{}", source.name());
            }
        }
    }

    Ok(())
}
