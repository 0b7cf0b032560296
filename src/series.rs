use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use crate::errors::Result;
use crate::utils::sanitize_filename;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub number: u32,
    pub session: String,
    /// Output file stem override; the episode number is used otherwise.
    #[serde(default)]
    pub label: Option<String>,
}

impl Episode {
    pub fn file_name(&self) -> String {
        let stem = self
            .label
            .as_deref()
            .map(sanitize_filename)
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.number.to_string());
        format!("{}.mp4", stem)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub id: u64,
    pub session: String,
    pub title: String,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default, with = "episode_list")]
    pub episodes: BTreeMap<u32, Episode>,
}

impl Series {
    /// Library sub-folder: the stored one, or the title with punctuation
    /// turned into `_` and whitespace into `-`.
    pub fn folder_name(&self) -> String {
        if let Some(folder) = self.folder.as_deref().filter(|f| !f.is_empty()) {
            return folder.to_string();
        }
        self.title
            .chars()
            .map(|c| match c {
                c if c.is_whitespace() => '-',
                c if c.is_ascii_alphanumeric() || c == '_' => c,
                _ => '_',
            })
            .collect()
    }
}

/// Episodes are stored as a JSON array and keyed by number in memory.
mod episode_list {
    use std::collections::BTreeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use super::Episode;

    pub fn serialize<S: Serializer>(episodes: &BTreeMap<u32, Episode>, serializer: S) -> Result<S::Ok, S::Error> {
        let list: Vec<&Episode> = episodes.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeMap<u32, Episode>, D::Error> {
        let list = Vec::<Episode>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|e| (e.number, e)).collect())
    }
}

/// Owned registry of known series, shared by clone.
#[derive(Debug, Clone, Default)]
pub struct SeriesRepository {
    series: Arc<RwLock<HashMap<u64, Series>>>,
}

impl SeriesRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, series: Series) {
        self.series.write().await.insert(series.id, series);
    }

    pub async fn get(&self, id: u64) -> Option<Series> {
        self.series.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: u64) -> Option<Series> {
        self.series.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.series.read().await.len()
    }

    /// Reads a JSON array of series.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let list: Vec<Series> = serde_json::from_str(&content)?;
        log::info!("Loaded {} series from {:?}", list.len(), path);

        let repository = Self::new();
        for series in list {
            repository.insert(series).await;
        }
        Ok(repository)
    }

    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let mut list: Vec<Series> = self.series.read().await.values().cloned().collect();
        list.sort_by_key(|s| s.id);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(&list)?).await?;
        Ok(())
    }
}
