use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No stream variants to choose from")]
    NoVariants,

    #[error("No episode options found")]
    EmptyOptions,

    #[error("Fetch error: {url} answered {status} '{content_type}'")]
    Fetch {
        url: String,
        status: u16,
        content_type: String,
    },

    #[error("No segments found in manifest: {0}")]
    NoSegments(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Assembly error: {0}")]
    Assembly(String),

    #[error("Episode {0} not found")]
    EpisodeNotFound(u32),

    #[error("Series {0} not found")]
    SeriesNotFound(u64),

    #[error("Corrupted resume state: {0}")]
    StateCorruption(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl AppError {
    /// Connection-level failure of a request to `url`.
    pub fn network(url: &str, err: impl std::fmt::Display) -> Self {
        AppError::Network(format!("{}: {}", url, err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
