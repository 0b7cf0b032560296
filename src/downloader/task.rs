use std::path::PathBuf;
use std::sync::Arc;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use crate::api::{OptionsProvider, SelectionPreference};
use crate::downloader::assembler::{Assembler, Remuxer};
use crate::downloader::http_pool::MediaSource;
use crate::downloader::manifest::ManifestResolver;
use crate::downloader::resume::ResumeStore;
use crate::downloader::segment::SegmentFetcher;
use crate::downloader::status::{StatusEvent, StatusSink};
use crate::downloader::variant::select_best;
use crate::errors::{AppError, Result};
use crate::series::SeriesRepository;

/// Name of the per-series folder holding episode working directories.
pub const WORK_DIR: &str = ".data";

/// Unit of work scheduled by the episode queue.
#[async_trait]
pub trait EpisodeRunner: Send + Sync {
    async fn run(&self, episode: u32, preference: &SelectionPreference, cancel: &CancellationToken) -> Result<()>;
}

/// Full pipeline for one episode of one series:
/// options, variant, manifest, segments in order, remux.
pub struct EpisodeTask {
    repository: SeriesRepository,
    series_id: u64,
    library: PathBuf,
    options: Arc<dyn OptionsProvider>,
    resolver: ManifestResolver,
    fetcher: SegmentFetcher,
    assembler: Assembler,
    sink: Arc<dyn StatusSink>,
}

impl EpisodeTask {
    pub fn new(
        repository: SeriesRepository,
        series_id: u64,
        library: impl Into<PathBuf>,
        options: Arc<dyn OptionsProvider>,
        source: Arc<dyn MediaSource>,
        remuxer: Arc<dyn Remuxer>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            repository,
            series_id,
            library: library.into(),
            options,
            resolver: ManifestResolver::new(source.clone()),
            fetcher: SegmentFetcher::new(source),
            assembler: Assembler::new(remuxer),
            sink,
        }
    }

    async fn process(&self, episode: u32, preference: &SelectionPreference, cancel: &CancellationToken) -> Result<()> {
        let series = self
            .repository
            .get(self.series_id)
            .await
            .ok_or(AppError::SeriesNotFound(self.series_id))?;
        let entry = series.episodes.get(&episode).ok_or(AppError::EpisodeNotFound(episode))?;

        let series_dir = self.library.join(series.folder_name());
        let output = series_dir.join(entry.file_name());
        if tokio::fs::try_exists(&output).await? {
            log::info!("✅ [TASK] Episode {} already at {:?}, skipping", episode, output);
            return Ok(());
        }

        let store = ResumeStore::new(series_dir.join(WORK_DIR).join(episode.to_string()));
        store.ensure().await?;

        let variants = self.options.fetch_options(&series.session, &entry.session, cancel).await?;
        let variant = select_best(&variants, preference)?;
        log::info!(
            "[TASK] Episode {}: {} {}p from '{}'",
            episode,
            variant.audio_track,
            variant.resolution,
            variant.provider_id
        );

        let mut state = self.resolver.resolve(&variant.source_url, &store, cancel).await?;
        let total = state.segments.len();

        for index in 0..total {
            if state.segments[index].done {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let done_before = state.done_count() as f32;
            let sink = &self.sink;
            let mut on_progress = |fraction: f32| {
                sink.update(StatusEvent::Progress {
                    episode,
                    fraction: (done_before + fraction.clamp(0.0, 1.0)) / total as f32,
                })
            };

            let url = state.segments[index].source_url.clone();
            self.fetcher
                .fetch(&url, &store.segment_path(index), &mut on_progress, cancel)
                .await?;

            state.segments[index].done = true;
            store.save(&state).await?;
            self.sink.update(StatusEvent::Progress {
                episode,
                fraction: state.progress(),
            });
        }

        log::info!("[TASK] Episode {}: all {} segments present, assembling", episode, total);
        self.assembler.assemble(&state, &store, &output, cancel).await
    }
}

#[async_trait]
impl EpisodeRunner for EpisodeTask {
    async fn run(&self, episode: u32, preference: &SelectionPreference, cancel: &CancellationToken) -> Result<()> {
        let result = self.process(episode, preference, cancel).await;
        match &result {
            Ok(()) => self.sink.update(StatusEvent::Completed(episode)),
            Err(e) => {
                log::error!("❌ [TASK] Episode {} failed: {}", episode, e);
                self.sink.update(StatusEvent::Error {
                    episode: Some(episode),
                    message: e.to_string(),
                });
            }
        }
        result
    }
}
