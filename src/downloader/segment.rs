use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use crate::downloader::http_pool::MediaSource;
use crate::errors::Result;

/// Sibling path the body is streamed into before it gets its final name.
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name: OsString = destination.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Downloads one segment.
///
/// Every call starts from an empty file: leftovers of an interrupted run are
/// discarded rather than appended to, and the final name only ever appears
/// for a complete body.
pub struct SegmentFetcher {
    source: Arc<dyn MediaSource>,
}

impl SegmentFetcher {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self { source }
    }

    pub async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: &mut (dyn FnMut(f32) + Send),
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let partial = part_path(destination);
        log::debug!("[SEGMENT] {} -> {:?}", url, destination);

        match self.source.download_to(url, &partial, progress, cancel).await {
            Ok(bytes) => {
                tokio::fs::rename(&partial, destination).await?;
                Ok(bytes)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                log::warn!("⚠️ [SEGMENT] {} failed: {}", url, e);
                Err(e)
            }
        }
    }
}
