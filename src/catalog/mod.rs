//! Catalog collaborator: title runtimes and metadata.

mod static_catalog;

pub use static_catalog::{CatalogTitle, StaticCatalog};

use async_trait::async_trait;
use thiserror::Error;

use crate::tracking::models::{TitleId, TitleMetadata};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Title {0} not found in catalog")]
    NotFound(TitleId),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the show catalog.
///
/// Implementations may be remote and eventually consistent. Callers treat
/// every error as a reason to degrade, never to fail a mutation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Runtime of each episode, in minutes, in airing order.
    async fn get_episode_runtimes(&self, title_id: TitleId) -> Result<Vec<u32>, CatalogError>;

    async fn get_title_metadata(&self, title_id: TitleId) -> Result<TitleMetadata, CatalogError>;

    /// Total runtime in minutes across all episodes.
    async fn get_title_runtime(&self, title_id: TitleId) -> Result<u32, CatalogError> {
        let runtimes = self.get_episode_runtimes(title_id).await?;
        Ok(runtimes.iter().copied().fold(0u32, u32::saturating_add))
    }
}
