//! In-memory stand-ins for the network, options and remux seams.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use crate::api::{OptionsProvider, StreamVariant};
use crate::downloader::assembler::Remuxer;
use crate::downloader::http_pool::{ContentCheck, MediaSource};
use crate::errors::{AppError, Result};

pub const MANIFEST_URL: &str = "https://cdn.example.com/stream/ep1/uwu.m3u8";

pub fn sample_manifest(segments: usize, with_key: bool) -> String {
    let mut body = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:4\n");
    if with_key {
        body.push_str(
            "#EXT-X-KEY:METHOD=AES-128,URI=\"https://keys.example.com/k.key\",IV=0x00000000000000000000000000000001\n",
        );
    }
    for i in 0..segments {
        body.push_str(&format!("#EXTINF:10.0,\nseg-{}.jpg\n", i));
    }
    body.push_str("#EXT-X-ENDLIST\n");
    body
}

#[derive(Default)]
pub struct FakeSource {
    bodies: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    fetches: AtomicUsize,
    downloads: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    /// Requests to `url` fail with a connection-level error.
    pub fn with_failure(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// URLs passed to `download_to`, in call order.
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    fn body(&self, url: &str) -> Result<Vec<u8>> {
        if self.failing.contains(url) {
            return Err(AppError::network(url, "connection reset"));
        }
        self.bodies.get(url).cloned().ok_or_else(|| AppError::Fetch {
            url: url.to_string(),
            status: 404,
            content_type: "text/html".to_string(),
        })
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn fetch(&self, url: &str, _check: ContentCheck, cancel: &CancellationToken) -> Result<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.body(url)
    }

    async fn download_to(
        &self,
        url: &str,
        destination: &Path,
        progress: &mut (dyn FnMut(f32) + Send),
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        self.downloads.lock().unwrap().push(url.to_string());
        let body = self.body(url)?;
        tokio::fs::write(destination, &body).await?;
        progress(1.0);
        Ok(body.len() as u64)
    }
}

/// Remuxer that concatenates the playlist into the output instead of running ffmpeg.
#[derive(Default)]
pub struct FakeRemuxer {
    pub fail: bool,
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl FakeRemuxer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Remuxer for FakeRemuxer {
    async fn remux(&self, playlist: &Path, output: &Path, _cancel: &CancellationToken) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((playlist.to_path_buf(), output.to_path_buf()));
        if self.fail {
            return Err(AppError::Assembly("remuxer exited with status 1".to_string()));
        }
        let playlist = tokio::fs::read(playlist).await?;
        tokio::fs::write(output, playlist).await?;
        Ok(())
    }
}

/// Options provider answering every episode with the same variants,
/// except for episode sessions registered as failing.
#[derive(Default)]
pub struct FakeOptions {
    variants: Vec<StreamVariant>,
    failing_sessions: HashSet<String>,
    calls: AtomicUsize,
}

impl FakeOptions {
    pub fn new(variants: Vec<StreamVariant>) -> Self {
        Self {
            variants,
            ..Self::default()
        }
    }

    pub fn with_failing_session(mut self, session: &str) -> Self {
        self.failing_sessions.insert(session.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OptionsProvider for FakeOptions {
    async fn fetch_options(
        &self,
        _series_session: &str,
        episode_session: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<StreamVariant>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_sessions.contains(episode_session) {
            return Err(AppError::EmptyOptions);
        }
        Ok(self.variants.clone())
    }
}

pub fn variant(audio: &str, resolution: u32, source_url: &str) -> StreamVariant {
    StreamVariant {
        audio_track: audio.to_string(),
        resolution,
        source_url: source_url.to_string(),
        provider_id: String::new(),
    }
}
