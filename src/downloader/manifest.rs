use std::borrow::Cow;
use std::sync::Arc;
use m3u8_rs::{KeyMethod, Playlist};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;
use crate::downloader::http_pool::{ContentCheck, MediaSource};
use crate::downloader::resume::ResumeStore;
use crate::errors::{AppError, Result};

/// Persisted resolution of one episode's manifest.
///
/// `segments` keeps manifest (playback) order and its length never changes
/// for a given `manifest_identity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestState {
    pub manifest_identity: String,
    #[serde(default)]
    pub media_sequence: u64,
    pub segments: Vec<SegmentState>,
    #[serde(default)]
    pub encryption: Option<EncryptionKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentState {
    pub source_url: String,
    #[serde(default)]
    pub duration: f32,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub method: String,
    #[serde(with = "base64_bytes")]
    pub key: Vec<u8>,
    #[serde(default)]
    pub iv: Option<String>,
}

impl ManifestState {
    pub fn done_count(&self) -> usize {
        self.segments.iter().filter(|s| s.done).count()
    }

    pub fn is_complete(&self) -> bool {
        self.segments.iter().all(|s| s.done)
    }

    pub fn progress(&self) -> f32 {
        if self.segments.is_empty() {
            return 0.0;
        }
        self.done_count() as f32 / self.segments.len() as f32
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// `#EXT-X-KEY` attributes as declared by the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyDirective {
    pub method: String,
    pub uri: Option<String>,
    pub iv: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedManifest {
    pub media_sequence: u64,
    /// Absolute segment URLs with their `#EXTINF` durations, in playlist order.
    pub segments: Vec<(String, f32)>,
    pub key: Option<KeyDirective>,
}

fn resolve_uri(base: &Url, uri: &str) -> Result<String> {
    base.join(uri.trim())
        .map(|url| url.to_string())
        .map_err(|e| AppError::NoSegments(format!("bad URI '{}': {}", uri, e)))
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const HEADER_TAG: &[u8] = b"#EXTM3U";

/// Some hosts serve playlists with a BOM or without the `#EXTM3U` line;
/// the segment list is still usable, so give the parser the header it expects.
fn with_header(body: &[u8]) -> Cow<'_, [u8]> {
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    let start = body.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(body.len());
    let body = &body[start..];
    if body.starts_with(HEADER_TAG) {
        return Cow::Borrowed(body);
    }

    let mut patched = Vec::with_capacity(HEADER_TAG.len() + 1 + body.len());
    patched.extend_from_slice(HEADER_TAG);
    patched.push(b'\n');
    patched.extend_from_slice(body);
    Cow::Owned(patched)
}

/// Extracts segments and the content key directive from a media playlist.
pub fn parse_manifest(body: &[u8], manifest_url: &str) -> Result<ParsedManifest> {
    let base = Url::parse(manifest_url)
        .map_err(|e| AppError::InvalidInput(format!("Invalid manifest URL '{}': {}", manifest_url, e)))?;

    let body = with_header(body);
    let playlist = match m3u8_rs::parse_playlist_res(&body) {
        Ok(Playlist::MediaPlaylist(playlist)) => playlist,
        Ok(Playlist::MasterPlaylist(_)) => {
            return Err(AppError::NoSegments(format!("{} is a master playlist", manifest_url)))
        }
        Err(e) => {
            return Err(AppError::NoSegments(format!("{} could not be parsed: {}", manifest_url, e)))
        }
    };

    let mut segments = Vec::with_capacity(playlist.segments.len());
    let mut key = None;
    for segment in &playlist.segments {
        if key.is_none() {
            key = segment.key.as_ref().and_then(|k| {
                let method = match &k.method {
                    KeyMethod::None => return None,
                    KeyMethod::AES128 => "AES-128".to_string(),
                    KeyMethod::SampleAES => "SAMPLE-AES".to_string(),
                    KeyMethod::Other(other) => other.clone(),
                };
                Some(KeyDirective {
                    method,
                    uri: k.uri.clone(),
                    iv: k.iv.clone(),
                })
            });
        }

        if segment.uri.trim().is_empty() {
            continue;
        }
        segments.push((resolve_uri(&base, &segment.uri)?, segment.duration));
    }

    if segments.is_empty() {
        return Err(AppError::NoSegments(manifest_url.to_string()));
    }

    if let Some(directive) = key.as_mut() {
        if let Some(uri) = directive.uri.take() {
            directive.uri = Some(resolve_uri(&base, &uri)?);
        }
    }

    Ok(ParsedManifest {
        media_sequence: playlist.media_sequence,
        segments,
        key,
    })
}

/// Turns a stream URL into a `ManifestState`, reusing persisted state when it still matches.
pub struct ManifestResolver {
    source: Arc<dyn MediaSource>,
}

impl ManifestResolver {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self { source }
    }

    pub async fn resolve(
        &self,
        stream_url: &str,
        store: &ResumeStore,
        cancel: &CancellationToken,
    ) -> Result<ManifestState> {
        let previous = match store.load().await {
            Ok(previous) => previous,
            Err(e) => {
                log::warn!("⚠️ [MANIFEST] Ignoring resume state in {:?}: {}", store.dir(), e);
                None
            }
        };

        if let Some(state) = previous {
            if state.manifest_identity == stream_url {
                log::info!(
                    "[MANIFEST] Resuming {} ({}/{} segments done)",
                    stream_url,
                    state.done_count(),
                    state.segments.len()
                );
                return Ok(state);
            }
            log::info!("[MANIFEST] Stream changed ({} -> {}), discarding resume state", state.manifest_identity, stream_url);
            store.purge().await?;
        }

        log::info!("[MANIFEST] Fetching manifest: {}", stream_url);
        let body = self.source.fetch(stream_url, ContentCheck::Application, cancel).await?;
        let parsed = parse_manifest(&body, stream_url)?;

        let encryption = match parsed.key {
            Some(KeyDirective { method, uri: Some(uri), iv }) => {
                log::info!("[MANIFEST] Fetching {} key: {}", method, uri);
                let key = self.source.fetch(&uri, ContentCheck::Application, cancel).await?;
                Some(EncryptionKey { method, key, iv })
            }
            Some(directive) => {
                log::warn!("⚠️ [MANIFEST] {} key declared without URI, ignoring", directive.method);
                None
            }
            None => None,
        };

        let state = ManifestState {
            manifest_identity: stream_url.to_string(),
            media_sequence: parsed.media_sequence,
            segments: parsed
                .segments
                .into_iter()
                .map(|(source_url, duration)| SegmentState {
                    source_url,
                    duration,
                    done: false,
                })
                .collect(),
            encryption,
        };

        store.save(&state).await?;
        store.write_playlist(&state).await?;
        log::info!("[MANIFEST] {} segment(s) to download", state.segments.len());
        Ok(state)
    }
}
