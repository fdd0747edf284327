use super::{CatalogError, CatalogProvider};
use crate::tracking::models::{TitleId, TitleMetadata};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tracing::info;

/// A catalog entry as stored in the JSON catalog file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTitle {
    pub id: TitleId,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub cast: Vec<String>,
    #[serde(default)]
    pub episode_runtimes: Vec<u32>,
}

impl CatalogTitle {
    pub fn episode_count(&self) -> u32 {
        self.episode_runtimes.len() as u32
    }
}

/// In-process catalog, loaded once from a JSON file or built in code.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    titles: RwLock<HashMap<TitleId, CatalogTitle>>,
}

impl StaticCatalog {
    pub fn new(titles: impl IntoIterator<Item = CatalogTitle>) -> Self {
        let catalog = Self::default();
        for title in titles {
            catalog.insert(title);
        }
        catalog
    }

    /// Loads a JSON array of titles. Duplicate ids are rejected.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file {:?}", path))?;
        let titles: Vec<CatalogTitle> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse catalog file {:?}", path))?;

        let mut by_id = HashMap::with_capacity(titles.len());
        for title in titles {
            if title.id <= 0 {
                bail!("Catalog title '{}' has invalid id {}", title.name, title.id);
            }
            if let Some(previous) = by_id.insert(title.id, title) {
                bail!("Duplicate catalog id {} ('{}')", previous.id, previous.name);
            }
        }
        info!("Loaded {} titles from {:?}", by_id.len(), path);

        Ok(Self {
            titles: RwLock::new(by_id),
        })
    }

    pub fn insert(&self, title: CatalogTitle) {
        self.titles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(title.id, title);
    }

    pub fn get(&self, title_id: TitleId) -> Option<CatalogTitle> {
        self.titles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&title_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.titles.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CatalogProvider for StaticCatalog {
    async fn get_episode_runtimes(&self, title_id: TitleId) -> Result<Vec<u32>, CatalogError> {
        self.get(title_id)
            .map(|t| t.episode_runtimes)
            .ok_or(CatalogError::NotFound(title_id))
    }

    async fn get_title_metadata(&self, title_id: TitleId) -> Result<TitleMetadata, CatalogError> {
        self.get(title_id)
            .map(|t| TitleMetadata {
                name: t.name,
                genres: t.genres,
                cast: t.cast,
            })
            .ok_or(CatalogError::NotFound(title_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn goblin() -> CatalogTitle {
        CatalogTitle {
            id: 42,
            name: "Guardian".to_string(),
            genres: vec!["Drama".to_string(), "Fantasy".to_string()],
            cast: vec!["Gong Yoo".to_string(), "Kim Go-eun".to_string()],
            episode_runtimes: vec![60; 16],
        }
    }

    #[tokio::test]
    async fn test_runtime_sums_episodes() {
        let catalog = StaticCatalog::new([goblin()]);

        assert_eq!(catalog.get_title_runtime(42).await.unwrap(), 960);
        assert_eq!(
            catalog.get_title_runtime(7).await,
            Err(CatalogError::NotFound(7))
        );
    }

    #[tokio::test]
    async fn test_metadata_lookup() {
        let catalog = StaticCatalog::new([goblin()]);

        let metadata = catalog.get_title_metadata(42).await.unwrap();
        assert_eq!(metadata.name, "Guardian");
        assert_eq!(metadata.genres, vec!["Drama", "Fantasy"]);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id": 1, "name": "Crash Landing", "genres": ["Romance"], "episode_runtimes": [70, 75]}},
                {{"id": 2, "name": "Signal"}}
            ]"#
        )
        .unwrap();

        let catalog = StaticCatalog::from_json_file(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(1).unwrap().episode_count(), 2);
        assert!(catalog.get(2).unwrap().cast.is_empty());
    }

    #[test]
    fn test_from_json_file_rejects_duplicates() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": 1, "name": "A"}}, {{"id": 1, "name": "B"}}]"#
        )
        .unwrap();

        let err = StaticCatalog::from_json_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Duplicate catalog id 1"));
    }
}
