//! Showtracker Engine Library
//!
//! Personal tracking and progression for a TV-show client: lists, top-10
//! ranking, watch statistics, completion records and achievements.

pub mod catalog;
pub mod config;
pub mod metrics;
pub mod record_store;
pub mod sqlite_persistence;
pub mod tracking;

// Re-export commonly used types for convenience
pub use catalog::{CatalogError, CatalogProvider, CatalogTitle, StaticCatalog};
pub use record_store::{InMemoryRecordStore, RecordStore, RetryPolicy, SqliteRecordStore};
pub use tracking::{
    EngineEvent, ListKind, PendingSyncQueue, PremiumStatus, SessionConfig, SessionDeps,
    TrackingError, TrackingSession, ValidationError,
};
