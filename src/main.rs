use std::path::PathBuf;
use std::sync::Arc;
use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::MultiProgress;
use log::info;

use episode_extractor::commands::{self, DownloadRequest, ProgressSink};
use episode_extractor::config::AppConfig;

#[derive(Debug, Parser)]
#[command(
    name = "episode-extractor",
    version,
    about = "Download and assemble episode streams with resume support"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download episodes of a series listed in a series file
    Download {
        /// JSON file with the known series
        #[arg(long)]
        series: PathBuf,
        #[arg(long)]
        id: u64,
        /// Episode numbers and ranges, e.g. `1-3,5`
        #[arg(long)]
        episodes: String,
        #[arg(long)]
        audio: Option<String>,
        #[arg(long)]
        resolution: Option<u32>,
        #[arg(long)]
        library: Option<PathBuf>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Check that ffmpeg can be started
    Check,
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Write the effective configuration to the config file
    Init,
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger; records are printed between progress bar redraws
    let bars = MultiProgress::new();
    commands::init_logging(&bars).context("Failed to initialize logging")?;

    let cli = Cli::parse();
    let config = AppConfig::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Download {
            series,
            id,
            episodes,
            audio,
            resolution,
            library,
            concurrency,
        } => {
            let request = DownloadRequest {
                series_file: series,
                series_id: id,
                episodes,
                audio,
                resolution,
                library,
                concurrency,
            };
            download(&config, request, bars).await
        }
        Command::Check => {
            let version = commands::check_environment(&config)
                .await
                .context("ffmpeg is not usable")?;
            println!("{}", version);
            Ok(())
        }
        Command::Config(ConfigCommand::Init) => {
            let path = commands::init_config(&config)?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            println!("{}", commands::show_config(&config)?);
            Ok(())
        }
    }
}

async fn download(config: &AppConfig, request: DownloadRequest, bars: MultiProgress) -> anyhow::Result<()> {
    let queue = commands::start_download(config, &request, Arc::new(ProgressSink::with_bars(bars)))
        .await
        .context("Failed to start extraction")?;

    tokio::select! {
        _ = queue.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping downloads");
            queue.shutdown().await;
            queue.wait_idle().await;
        }
    }

    let status = queue.status().await;
    for failure in &status.failures {
        log::error!(
            "Episode {} failed at {}: {}",
            failure.episode,
            failure.failed_at.format("%H:%M:%S"),
            failure.error
        );
    }
    if !status.failures.is_empty() {
        anyhow::bail!("{} episodes failed", status.failures.len());
    }
    info!("All episodes extracted");
    Ok(())
}
