use std::collections::BTreeMap;
use std::sync::Arc;
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use url::Url;
use super::{OptionsProvider, StreamVariant, DEFAULT_AUDIO_TRACK};
use crate::downloader::http_pool::{ContentCheck, MediaSource};
use crate::errors::{AppError, Result};

#[derive(Debug, Deserialize)]
struct LinksResponse {
    #[serde(default)]
    data: Option<Vec<BTreeMap<String, LinkOption>>>,
}

#[derive(Debug, Deserialize)]
struct LinkOption {
    kwik: String,
    audio: Option<String>,
    fansub: Option<String>,
}

/// Flattens the `data: [{ "<resolution>": {...} }]` links payload into stream variants.
pub fn flatten_options(body: &[u8]) -> Result<Vec<StreamVariant>> {
    let response: LinksResponse = serde_json::from_slice(body)?;
    let data = response.data.unwrap_or_default();
    if data.is_empty() {
        return Err(AppError::EmptyOptions);
    }

    let mut variants = Vec::new();
    for item in data {
        for (resolution_key, option) in item {
            let resolution = match resolution_key.trim().trim_end_matches('p').parse::<u32>() {
                Ok(resolution) => resolution,
                Err(_) => {
                    log::warn!("[OPTIONS] Skipping option with resolution '{}'", resolution_key);
                    continue;
                }
            };

            variants.push(StreamVariant {
                audio_track: option
                    .audio
                    .filter(|a| !a.is_empty())
                    .unwrap_or_else(|| DEFAULT_AUDIO_TRACK.to_string()),
                resolution,
                source_url: option.kwik,
                provider_id: option.fansub.unwrap_or_default(),
            });
        }
    }

    if variants.is_empty() {
        return Err(AppError::EmptyOptions);
    }
    Ok(variants)
}

/// Options provider backed by the site's `m=links` API.
pub struct PaheOptionsProvider {
    source: Arc<dyn MediaSource>,
    api_base: String,
}

impl PaheOptionsProvider {
    pub fn new(source: Arc<dyn MediaSource>, api_base: impl Into<String>) -> Self {
        Self {
            source,
            api_base: api_base.into(),
        }
    }

    pub fn links_url(&self, series_session: &str, episode_session: &str) -> Result<String> {
        let mut url = Url::parse(&self.api_base)
            .and_then(|base| base.join("api"))
            .map_err(|e| AppError::InvalidInput(format!("Invalid API base '{}': {}", self.api_base, e)))?;

        url.query_pairs_mut()
            .append_pair("m", "links")
            .append_pair("id", series_session)
            .append_pair("session", episode_session)
            .append_pair("p", "kwik");
        Ok(url.to_string())
    }
}

#[async_trait]
impl OptionsProvider for PaheOptionsProvider {
    async fn fetch_options(
        &self,
        series_session: &str,
        episode_session: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<StreamVariant>> {
        let url = self.links_url(series_session, episode_session)?;
        log::info!("[OPTIONS] Fetching episode options: {}", url);

        let body = self.source.fetch(&url, ContentCheck::Json, cancel).await?;
        let variants = flatten_options(&body)?;

        log::debug!("[OPTIONS] {} variant(s) offered", variants.len());
        Ok(variants)
    }
}
