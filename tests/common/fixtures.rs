//! Test fixture creation

use super::constants::*;
use showtracker_engine::catalog::{CatalogTitle, StaticCatalog};
use std::path::{Path, PathBuf};

fn titles() -> Vec<CatalogTitle> {
    let mut titles = vec![
        CatalogTitle {
            id: GUARDIAN_ID,
            name: GUARDIAN_NAME.to_string(),
            genres: vec!["Drama".to_string(), "Fantasy".to_string()],
            cast: vec![ACTOR_GONG_YOO.to_string(), "Kim Go-eun".to_string()],
            episode_runtimes: vec![60; GUARDIAN_EPISODES as usize],
        },
        CatalogTitle {
            id: SIGNAL_ID,
            name: "Signal".to_string(),
            genres: vec!["Thriller".to_string()],
            cast: vec!["Kim Hye-soo".to_string(), "Lee Je-hoon".to_string()],
            episode_runtimes: vec![70; 16],
        },
        CatalogTitle {
            id: CRASH_LANDING_ID,
            name: "Crash Landing on You".to_string(),
            genres: vec!["Romance".to_string(), "Comedy".to_string()],
            cast: vec!["Hyun Bin".to_string(), "Son Ye-jin".to_string()],
            episode_runtimes: vec![45; 12],
        },
    ];
    for i in 0..FILLER_COUNT {
        titles.push(CatalogTitle {
            id: FILLER_FIRST_ID + i,
            name: format!("Filler Drama {}", i + 1),
            genres: vec!["Drama".to_string()],
            cast: vec![ACTOR_GONG_YOO.to_string()],
            episode_runtimes: vec![30; 4],
        });
    }
    titles
}

/// Catalog with Guardian, Signal, Crash Landing and a block of filler
/// dramas starting at `FILLER_FIRST_ID`.
pub fn create_test_catalog() -> StaticCatalog {
    StaticCatalog::new(titles())
}

/// Same titles as `create_test_catalog`, written as a JSON catalog file.
pub fn write_test_catalog_json(dir: &Path) -> PathBuf {
    let path = dir.join("catalog.json");
    let json = serde_json::to_string_pretty(&titles()).expect("Failed to serialize catalog");
    std::fs::write(&path, json).expect("Failed to write catalog file");
    path
}
