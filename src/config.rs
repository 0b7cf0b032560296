use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::api::SelectionPreference;
use crate::errors::{AppError, Result};

const ENV_PREFIX: &str = "EXTRACTOR";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub library_path: PathBuf,
    pub max_concurrent_episodes: usize,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    pub referer: String,
    pub api_base: String,
    pub preferred_audio: String,
    pub preferred_resolution: Option<u32>,
    pub ffmpeg_path: Option<PathBuf>,
    pub proxy: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            library_path: dirs::download_dir()
                .map(|dir| dir.join("anime"))
                .unwrap_or_else(|| PathBuf::from("./downloads")),
            max_concurrent_episodes: 7,
            request_timeout_secs: 60,
            connect_timeout_secs: 15,
            user_agent: "AnimePaheXtractor".to_string(),
            referer: "https://kwik.cx".to_string(),
            api_base: "https://animepahe.si".to_string(),
            preferred_audio: "jpn".to_string(),
            preferred_resolution: None,
            ffmpeg_path: None,
            proxy: None,
        }
    }
}

impl AppConfig {
    /// Loads defaults, then the config file (if any), then `EXTRACTOR_*` env overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(Some(config_path))
    }

    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?);

        if let Some(path) = config_path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            );
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::get_config_path()?;
        if let Some(config_dir) = config_path.parent() {
            std::fs::create_dir_all(config_dir)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config(config::ConfigError::Message("Could not find config directory".to_string())))?;

        Ok(config_dir.join("episode-extractor").join("config.json"))
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_episodes == 0 {
            return Err(AppError::InvalidInput("max_concurrent_episodes must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(AppError::InvalidInput("request_timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn selection_preference(&self) -> SelectionPreference {
        SelectionPreference {
            audio_track: self.preferred_audio.clone(),
            target_resolution: self.preferred_resolution,
        }
    }

    pub fn ffmpeg_binary(&self) -> PathBuf {
        self.ffmpeg_path.clone().unwrap_or_else(|| PathBuf::from("ffmpeg"))
    }
}
