use std::path::Path;
use std::time::Duration;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, HOST, REFERER};
use reqwest::{Client, ClientBuilder, Proxy, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Predicate applied to the response content-type before the body is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCheck {
    /// Content-type contains `application` (manifests, keys).
    Application,
    /// Content-type is `application/json` (API responses).
    Json,
    Any,
}

impl ContentCheck {
    pub fn accepts(&self, content_type: &str) -> bool {
        match self {
            ContentCheck::Application => content_type.contains("application"),
            ContentCheck::Json => content_type.starts_with("application/json"),
            ContentCheck::Any => true,
        }
    }
}

/// Network side of the pipeline: small bodies fetched into memory, segments streamed to disk.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(&self, url: &str, check: ContentCheck, cancel: &CancellationToken) -> Result<Vec<u8>>;

    /// Writes the body of `url` to `destination`, truncating whatever was there.
    /// `progress` receives `received / content_length` when the length is known.
    async fn download_to(
        &self,
        url: &str,
        destination: &Path,
        progress: &mut (dyn FnMut(f32) + Send),
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

/// Shared HTTP client for API, manifest, key and segment requests
pub struct HttpPool {
    client: Client,
    referer: Option<String>,
}

impl HttpPool {
    pub fn new(timeout: Duration, connect_timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Self::builder(timeout, connect_timeout, user_agent).build()?;

        Ok(Self {
            client,
            referer: None,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let mut builder = Self::builder(timeout, connect_timeout, &config.user_agent);

        if let Some(proxy_url) = &config.proxy {
            log::info!("[HTTP] Using proxy: {}", proxy_url);
            builder = builder.proxy(Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
            referer: Some(config.referer.clone()).filter(|r| !r.is_empty()),
        })
    }

    fn builder(timeout: Duration, connect_timeout: Duration, user_agent: &str) -> ClientBuilder {
        ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .user_agent(user_agent)
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
    }

    /// GET with the fixed header set: `Host`, `User-Agent` and the optional `Referer`.
    async fn send(&self, url: &str, cancel: &CancellationToken) -> Result<reqwest::Response> {
        let parsed = Url::parse(url)
            .map_err(|e| AppError::InvalidInput(format!("Invalid URL '{}': {}", url, e)))?;

        let mut request = self.client.get(parsed.as_str());
        if let Some(host) = parsed.host_str() {
            let host = match parsed.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            request = request.header(HOST, host);
        }
        if let Some(referer) = &self.referer {
            request = request.header(REFERER, referer);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            response = request.send() => response.map_err(|e| AppError::network(url, e)),
        }
    }

    fn check_response(url: &str, response: &reqwest::Response, check: ContentCheck) -> Result<()> {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if response.status() != StatusCode::OK || !check.accepts(&content_type) {
            return Err(AppError::Fetch {
                url: url.to_string(),
                status: response.status().as_u16(),
                content_type,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MediaSource for HttpPool {
    async fn fetch(&self, url: &str, check: ContentCheck, cancel: &CancellationToken) -> Result<Vec<u8>> {
        log::debug!("[HTTP] GET {}", url);
        let response = self.send(url, cancel).await?;
        Self::check_response(url, &response, check)?;

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            body = response.bytes() => body.map_err(|e| AppError::network(url, e))?,
        };
        Ok(body.to_vec())
    }

    async fn download_to(
        &self,
        url: &str,
        destination: &Path,
        progress: &mut (dyn FnMut(f32) + Send),
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let response = self.send(url, cancel).await?;
        Self::check_response(url, &response, ContentCheck::Any)?;

        let total_size = response.content_length().unwrap_or(0);
        let mut file = tokio::fs::File::create(destination).await?;
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| AppError::network(url, e))?;

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if total_size > 0 {
                progress(downloaded as f32 / total_size as f32);
            }
        }
        file.flush().await?;

        if total_size > 0 && downloaded != total_size {
            return Err(AppError::network(
                url,
                format!("body ended after {} of {} bytes", downloaded, total_size),
            ));
        }

        Ok(downloaded)
    }
}
