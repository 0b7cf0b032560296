use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use crate::downloader::manifest::ManifestState;
use crate::downloader::resume::ResumeStore;
use crate::errors::{AppError, Result};

/// Joins the segments listed by a local playlist into one container, copying streams.
#[async_trait]
pub trait Remuxer: Send + Sync {
    async fn remux(&self, playlist: &Path, output: &Path, cancel: &CancellationToken) -> Result<()>;
}

pub struct FfmpegRemuxer {
    binary: PathBuf,
}

impl FfmpegRemuxer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    pub fn args(playlist: &Path, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            // segments carry no media extension
            "-allowed_extensions",
            "ALL",
            "-protocol_whitelist",
            "file,crypto,data",
            "-i",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(playlist.to_string_lossy().into_owned());
        args.extend(["-c:v", "copy", "-c:a", "copy"].iter().map(|s| s.to_string()));
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    async fn remux(&self, playlist: &Path, output: &Path, cancel: &CancellationToken) -> Result<()> {
        log::info!("🚀 [ASSEMBLE] Running {:?} on {:?}", self.binary, playlist);

        let child = Command::new(&self.binary)
            .args(Self::args(playlist, output))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Assembly(format!("failed to start {:?}: {}", self.binary, e)))?;

        let finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            finished = child.wait_with_output() => finished?,
        };

        if !finished.status.success() {
            let stderr = String::from_utf8_lossy(&finished.stderr);
            log::error!("❌ [ASSEMBLE] ffmpeg failed on {:?}: {}", output, stderr.trim());
            return Err(AppError::Assembly(format!("ffmpeg exited with {}: {}", finished.status, stderr.trim())));
        }
        Ok(())
    }
}

/// Runs `<ffmpeg> -version` and returns its first line.
pub async fn check_ffmpeg(binary: &Path) -> Result<String> {
    let output = Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| AppError::Assembly(format!("failed to start {:?}: {}", binary, e)))?;

    if !output.status.success() {
        return Err(AppError::Assembly(format!("{:?} -version exited with {}", binary, output.status)));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string())
}

/// Temporary output name: `Episode 1.mp4` becomes `Episode 1.part.mp4`.
pub fn partial_output(output: &Path) -> PathBuf {
    let stem = output.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    output.with_file_name(format!("{}.part.mp4", stem))
}

/// Final stage of an episode: remux the completed segments, then drop the working directory.
pub struct Assembler {
    remuxer: Arc<dyn Remuxer>,
}

impl Assembler {
    pub fn new(remuxer: Arc<dyn Remuxer>) -> Self {
        Self { remuxer }
    }

    pub async fn assemble(
        &self,
        state: &ManifestState,
        store: &ResumeStore,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !state.is_complete() {
            return Err(AppError::Assembly(format!(
                "{} of {} segments missing",
                state.segments.len() - state.done_count(),
                state.segments.len()
            )));
        }

        // regenerated so a resumed run never depends on a playlist from an older layout
        let playlist = store.write_playlist(state).await?;
        let partial = partial_output(output);

        if let Err(e) = self.remuxer.remux(&playlist, &partial, cancel).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        tokio::fs::rename(&partial, output).await?;
        log::info!("✅ [ASSEMBLE] Wrote {:?}", output);

        store.remove().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::manifest::SegmentState;
    use crate::downloader::testing::FakeRemuxer;

    fn finished_state(done: bool) -> ManifestState {
        ManifestState {
            manifest_identity: "https://cdn.example.com/a.m3u8".to_string(),
            media_sequence: 0,
            segments: (0..2)
                .map(|i| SegmentState {
                    source_url: format!("https://cdn.example.com/{}.ts", i),
                    duration: 4.0,
                    done,
                })
                .collect(),
            encryption: None,
        }
    }

    #[test]
    fn test_ffmpeg_arguments() {
        let args = FfmpegRemuxer::args(Path::new("/w/playlist.m3u8"), Path::new("/out/Episode 1.part.mp4"));
        assert_eq!(
            args,
            vec![
                "-hide_banner", "-loglevel", "error", "-y",
                "-allowed_extensions", "ALL",
                "-protocol_whitelist", "file,crypto,data",
                "-i", "/w/playlist.m3u8",
                "-c:v", "copy", "-c:a", "copy",
                "/out/Episode 1.part.mp4",
            ]
        );
    }

    #[test]
    fn test_partial_output_name() {
        assert_eq!(
            partial_output(Path::new("/lib/Show/Episode 1.mp4")),
            PathBuf::from("/lib/Show/Episode 1.part.mp4")
        );
    }

    #[tokio::test]
    async fn test_success_renames_output_and_removes_workdir() {
        let library = tempfile::tempdir().unwrap();
        let store = ResumeStore::new(library.path().join(".data").join("1"));
        store.ensure().await.unwrap();
        let output = library.path().join("Episode 1.mp4");

        let remuxer = Arc::new(FakeRemuxer::default());
        let assembler = Assembler::new(remuxer.clone());
        assembler
            .assemble(&finished_state(true), &store, &output, &CancellationToken::new())
            .await
            .unwrap();

        assert!(output.exists());
        assert!(!partial_output(&output).exists());
        assert!(!store.dir().exists());
        assert_eq!(remuxer.calls(), vec![(store.playlist_path(), partial_output(&output))]);
    }

    #[tokio::test]
    async fn test_failure_keeps_workdir_for_retry() {
        let library = tempfile::tempdir().unwrap();
        let store = ResumeStore::new(library.path().join(".data").join("1"));
        store.ensure().await.unwrap();
        let output = library.path().join("Episode 1.mp4");

        let assembler = Assembler::new(Arc::new(FakeRemuxer::failing()));
        let result = assembler
            .assemble(&finished_state(true), &store, &output, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(AppError::Assembly(_))));
        assert!(!output.exists());
        assert!(store.playlist_path().exists());
    }

    #[tokio::test]
    async fn test_incomplete_state_is_refused() {
        let library = tempfile::tempdir().unwrap();
        let store = ResumeStore::new(library.path());
        let remuxer = Arc::new(FakeRemuxer::default());
        let assembler = Assembler::new(remuxer.clone());

        let result = assembler
            .assemble(&finished_state(false), &store, &library.path().join("x.mp4"), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(AppError::Assembly(_))));
        assert!(remuxer.calls().is_empty());
    }
}
