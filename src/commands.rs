use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{Log, Metadata, Record};
use serde::{Deserialize, Serialize};

use crate::api::{PaheOptionsProvider, SelectionPreference};
use crate::config::AppConfig;
use crate::downloader::assembler::{check_ffmpeg, FfmpegRemuxer};
use crate::downloader::http_pool::{HttpPool, MediaSource};
use crate::downloader::manager::EpisodeQueue;
use crate::downloader::status::{StatusEvent, StatusSink};
use crate::downloader::task::EpisodeTask;
use crate::errors::{AppError, Result};
use crate::series::SeriesRepository;
use crate::utils::parse_episode_list;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub series_file: PathBuf,
    pub series_id: u64,
    pub episodes: String,
    pub audio: Option<String>,
    pub resolution: Option<u32>,
    pub library: Option<PathBuf>,
    pub concurrency: Option<usize>,
}

impl DownloadRequest {
    /// Command-line values win over the configured ones.
    pub fn preference(&self, config: &AppConfig) -> SelectionPreference {
        let mut preference = config.selection_preference();
        if let Some(audio) = &self.audio {
            preference.audio_track = audio.clone();
        }
        if self.resolution.is_some() {
            preference.target_resolution = self.resolution;
        }
        preference
    }
}

/// Loads the series, wires the pipeline and enqueues the requested episodes.
///
/// The returned queue is already draining; callers wait on it or shut it down.
pub async fn start_download(
    config: &AppConfig,
    request: &DownloadRequest,
    sink: Arc<dyn StatusSink>,
) -> Result<EpisodeQueue> {
    let episodes = parse_episode_list(&request.episodes)?;
    let library = request.library.clone().unwrap_or_else(|| config.library_path.clone());
    if !tokio::fs::try_exists(&library).await? {
        return Err(AppError::InvalidInput(format!("folder {:?} doesn't exist", library)));
    }

    let repository = SeriesRepository::load_from_file(&request.series_file).await?;
    let series = repository
        .get(request.series_id)
        .await
        .ok_or(AppError::SeriesNotFound(request.series_id))?;
    log::info!("Extracting {} episode(s) of '{}'", episodes.len(), series.title);

    let source: Arc<dyn MediaSource> = Arc::new(HttpPool::from_config(config)?);
    let options = Arc::new(PaheOptionsProvider::new(source.clone(), config.api_base.clone()));
    let remuxer = Arc::new(FfmpegRemuxer::new(config.ffmpeg_binary()));
    let task = EpisodeTask::new(
        repository,
        request.series_id,
        library,
        options,
        source,
        remuxer,
        sink.clone(),
    );

    let slots = request.concurrency.unwrap_or(config.max_concurrent_episodes);
    let queue = EpisodeQueue::new(Arc::new(task), sink, slots);
    queue.enqueue(&episodes, &request.preference(config)).await?;
    Ok(queue)
}

pub async fn check_environment(config: &AppConfig) -> Result<String> {
    check_ffmpeg(&config.ffmpeg_binary()).await
}

/// Writes the current configuration to its default location.
pub fn init_config(config: &AppConfig) -> Result<PathBuf> {
    let path = config.save()?;
    log::info!("Configuration written to {:?}", path);
    Ok(path)
}

pub fn show_config(config: &AppConfig) -> Result<String> {
    Ok(serde_json::to_string_pretty(config)?)
}

/// Logger that hides the progress bars while a record is written,
/// so log lines never land in the middle of a redraw.
pub struct ProgressLogger {
    inner: env_logger::Logger,
    bars: MultiProgress,
}

impl ProgressLogger {
    pub fn new(inner: env_logger::Logger, bars: MultiProgress) -> Self {
        Self { inner, bars }
    }
}

impl Log for ProgressLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.inner.matches(record) {
            self.bars.suspend(|| self.inner.log(record));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Installs the global logger (`RUST_LOG`, default `info`) on top of `bars`.
pub fn init_logging(bars: &MultiProgress) -> std::result::Result<(), log::SetLoggerError> {
    let inner = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let max_level = inner.filter();
    log::set_boxed_logger(Box::new(ProgressLogger::new(inner, bars.clone())))?;
    log::set_max_level(max_level);
    Ok(())
}

/// Terminal status sink: one progress bar per running episode.
pub struct ProgressSink {
    bars: MultiProgress,
    episodes: Mutex<HashMap<u32, ProgressBar>>,
    style: ProgressStyle,
}

impl ProgressSink {
    pub fn new() -> Self {
        Self::with_bars(MultiProgress::new())
    }

    /// Draws into `bars`; share it with [`init_logging`] to keep logs and bars apart.
    pub fn with_bars(bars: MultiProgress) -> Self {
        let style = ProgressStyle::with_template("{prefix:>12} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        Self {
            bars,
            episodes: Mutex::new(HashMap::new()),
            style,
        }
    }

    fn bar(&self, episode: u32) -> Option<ProgressBar> {
        let mut episodes = self.episodes.lock().ok()?;
        let bar = episodes.entry(episode).or_insert_with(|| {
            let bar = self.bars.add(ProgressBar::new(1000));
            bar.set_style(self.style.clone());
            bar.set_prefix(format!("Episode {}", episode));
            bar.enable_steady_tick(Duration::from_millis(250));
            bar
        });
        Some(bar.clone())
    }

    fn finish(&self, episode: u32, message: String) {
        let bar = self.episodes.lock().ok().and_then(|mut e| e.remove(&episode));
        if let Some(bar) = bar {
            bar.finish_with_message(message);
        }
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for ProgressSink {
    fn update(&self, event: StatusEvent) {
        match event {
            StatusEvent::Left(left) => log::debug!("{} episode(s) waiting", left),
            StatusEvent::Current(episode) => {
                if let Some(bar) = self.bar(episode) {
                    bar.set_message("starting");
                }
            }
            StatusEvent::Progress { episode, fraction } => {
                if let Some(bar) = self.bar(episode) {
                    bar.set_position((fraction.clamp(0.0, 1.0) * 1000.0) as u64);
                    bar.set_message("downloading");
                }
            }
            StatusEvent::Completed(episode) => {
                if let Some(bar) = self.bar(episode) {
                    bar.set_position(1000);
                }
                self.finish(episode, "done".to_string());
            }
            StatusEvent::Error { episode: Some(episode), message } => {
                self.finish(episode, format!("failed: {}", message));
            }
            StatusEvent::Error { episode: None, message } => log::error!("{}", message),
            StatusEvent::End => {
                let _ = self.bars.clear();
            }
        }
    }
}
