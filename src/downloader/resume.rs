//! Per-episode working directory and its durable resume state.
//!
//! The directory holds a single `state` file (zlib-compressed JSON of the whole
//! [`ManifestState`]), the local `playlist.m3u8` handed to the remuxer, the
//! content key (if any) and the raw segment files. Identity and per-segment
//! status live in the same file and are replaced atomically, so a crash can at
//! most lose the flag of the segment being recorded.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use crate::downloader::manifest::ManifestState;
use crate::errors::{AppError, Result};
use crate::utils::ensure_dir_exists;

pub const STATE_FILE: &str = "state";
pub const PLAYLIST_FILE: &str = "playlist.m3u8";
pub const KEY_FILE: &str = "key";
const SEGMENT_PREFIX: &str = "segment-";

pub fn encode_state(state: &ManifestState) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(state)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub fn decode_state(bytes: &[u8]) -> Result<ManifestState> {
    let mut json = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| AppError::StateCorruption(format!("inflate failed: {}", e)))?;

    let state: ManifestState = serde_json::from_slice(&json)
        .map_err(|e| AppError::StateCorruption(format!("invalid state document: {}", e)))?;

    if state.segments.is_empty() {
        return Err(AppError::StateCorruption("state lists no segments".to_string()));
    }
    Ok(state)
}

pub fn segment_file_name(index: usize) -> String {
    format!("{}{:05}", SEGMENT_PREFIX, index)
}

/// Renders the local playlist: every segment in manifest order, pointing at
/// the files in the working directory.
pub fn render_playlist(state: &ManifestState) -> String {
    let target_duration = state
        .segments
        .iter()
        .map(|s| s.duration.ceil() as u64)
        .max()
        .unwrap_or(0)
        .max(1);

    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    playlist.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", target_duration));
    playlist.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", state.media_sequence));
    playlist.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");

    if let Some(encryption) = &state.encryption {
        playlist.push_str(&format!("#EXT-X-KEY:METHOD={},URI=\"{}\"", encryption.method, KEY_FILE));
        if let Some(iv) = &encryption.iv {
            playlist.push_str(&format!(",IV={}", iv));
        }
        playlist.push('\n');
    }

    for (index, segment) in state.segments.iter().enumerate() {
        playlist.push_str(&format!("#EXTINF:{:.3},\n{}\n", segment.duration, segment_file_name(index)));
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}

/// Handle on one episode's working directory.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    dir: PathBuf,
}

impl ResumeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn playlist_path(&self) -> PathBuf {
        self.dir.join(PLAYLIST_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE)
    }

    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.dir.join(segment_file_name(index))
    }

    pub async fn ensure(&self) -> Result<()> {
        ensure_dir_exists(&self.dir).await
    }

    /// `Ok(None)` when nothing was persisted, `StateCorruption` when it cannot be read back.
    pub async fn load(&self) -> Result<Option<ManifestState>> {
        let bytes = match tokio::fs::read(self.state_path()).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::StateCorruption(format!("unreadable state file: {}", e))),
        };
        decode_state(&bytes).map(Some)
    }

    /// Replaces the state file atomically (temp file in the same directory, then rename).
    pub async fn save(&self, state: &ManifestState) -> Result<()> {
        let bytes = encode_state(state)?;
        let dir = self.dir.clone();
        let path = self.state_path();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
            temp.write_all(&bytes)?;
            temp.as_file().sync_all()?;
            temp.persist(&path).map_err(|e| AppError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    /// Writes the key file (if any) and the local playlist; returns the playlist path.
    pub async fn write_playlist(&self, state: &ManifestState) -> Result<PathBuf> {
        if let Some(encryption) = &state.encryption {
            tokio::fs::write(self.key_path(), &encryption.key).await?;
        }
        let path = self.playlist_path();
        tokio::fs::write(&path, render_playlist(state)).await?;
        Ok(path)
    }

    /// Drops every artefact of a previous manifest but keeps the directory.
    pub async fn purge(&self) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let owned = name == STATE_FILE
                || name == PLAYLIST_FILE
                || name == KEY_FILE
                || name.starts_with(SEGMENT_PREFIX);
            if owned && entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
