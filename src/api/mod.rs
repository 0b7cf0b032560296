pub mod pahe;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use crate::errors::Result;

pub use pahe::{flatten_options, PaheOptionsProvider};

/// Audio track used when the requested one is not offered.
pub const DEFAULT_AUDIO_TRACK: &str = "jpn";

/// One encoding of an episode at a given audio track and resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamVariant {
    pub audio_track: String,
    pub resolution: u32,
    pub source_url: String,
    pub provider_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPreference {
    pub audio_track: String,
    /// `None` means "as high as available".
    pub target_resolution: Option<u32>,
}

impl Default for SelectionPreference {
    fn default() -> Self {
        Self {
            audio_track: DEFAULT_AUDIO_TRACK.to_string(),
            target_resolution: None,
        }
    }
}

/// Source of the stream variants offered for one episode.
#[async_trait]
pub trait OptionsProvider: Send + Sync {
    async fn fetch_options(
        &self,
        series_session: &str,
        episode_session: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamVariant>>;
}
