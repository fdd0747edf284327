mod file_config;

pub use file_config::{CompletionConfig, FileConfig, SyncConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub catalog_path: Option<PathBuf>,
    pub user_id: usize,
    pub logging_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub catalog_path: Option<PathBuf>,
    pub user_id: usize,
    pub logging_level: String,

    // Feature configs (with defaults)
    pub sync: SyncSettings,
    pub completion: CompletionSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let catalog_path = file
            .catalog_path
            .map(PathBuf::from)
            .or_else(|| cli.catalog_path.clone());
        if let Some(path) = &catalog_path {
            if !path.is_file() {
                bail!("Catalog file not found: {:?}", path);
            }
        }

        let user_id = file.user_id.unwrap_or(cli.user_id);
        if user_id == 0 {
            bail!("user_id must be a positive number");
        }

        let logging_level = file
            .logging_level
            .or_else(|| cli.logging_level.clone())
            .unwrap_or_else(|| "info".to_string());

        let defaults = SyncSettings::default();
        let sync_file = file.sync.unwrap_or_default();
        let sync = SyncSettings {
            max_retries: sync_file.max_retries.unwrap_or(defaults.max_retries),
            initial_backoff_ms: sync_file
                .initial_backoff_ms
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: sync_file.max_backoff_ms.unwrap_or(defaults.max_backoff_ms),
            backoff_multiplier: sync_file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
            attempt_timeout_ms: sync_file
                .attempt_timeout_ms
                .unwrap_or(defaults.attempt_timeout_ms),
            pending_retry_interval_secs: sync_file
                .pending_retry_interval_secs
                .unwrap_or(defaults.pending_retry_interval_secs),
        };
        if sync.backoff_multiplier < 1.0 {
            bail!(
                "sync.backoff_multiplier must be >= 1.0, got {}",
                sync.backoff_multiplier
            );
        }

        let completion_file = file.completion.unwrap_or_default();
        let completion = CompletionSettings {
            metadata_timeout_ms: completion_file
                .metadata_timeout_ms
                .unwrap_or(CompletionSettings::default().metadata_timeout_ms),
        };

        Ok(Self {
            db_dir,
            catalog_path,
            user_id,
            logging_level,
            sync,
            completion,
        })
    }

    pub fn record_db_path(&self) -> PathBuf {
        self.db_dir.join("tracking.db")
    }

    pub fn pending_queue_path(&self) -> PathBuf {
        self.db_dir.join(format!("pending_sync_{}.json", self.user_id))
    }
}

/// Remote persistence settings.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub attempt_timeout_ms: u64,
    pub pending_retry_interval_secs: u64,
}

impl SyncSettings {
    pub fn pending_retry_interval(&self) -> Duration {
        Duration::from_secs(self.pending_retry_interval_secs)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 4000,
            backoff_multiplier: 2.0,
            attempt_timeout_ms: 5000,
            pending_retry_interval_secs: 60,
        }
    }
}

/// Completion pipeline settings.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    /// Timeout for each catalog lookup; on expiry the runtime degrades to 0.
    pub metadata_timeout_ms: u64,
}

impl CompletionSettings {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            metadata_timeout_ms: 3000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli_with_dir(dir: &TempDir) -> CliConfig {
        CliConfig {
            db_dir: Some(dir.path().to_path_buf()),
            user_id: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli_with_dir(&dir), None).unwrap();

        assert_eq!(config.db_dir, dir.path());
        assert_eq!(config.user_id, 1);
        assert_eq!(config.logging_level, "info");
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.completion.metadata_timeout_ms, 3000);
        assert_eq!(config.record_db_path(), dir.path().join("tracking.db"));
        assert_eq!(
            config.pending_queue_path(),
            dir.path().join("pending_sync_1.json")
        );
    }

    #[test]
    fn test_file_overrides_cli() {
        let dir = TempDir::new().unwrap();
        let file = FileConfig {
            user_id: Some(9),
            logging_level: Some("debug".to_string()),
            sync: Some(SyncConfig {
                max_retries: Some(6),
                attempt_timeout_ms: Some(100),
                ..Default::default()
            }),
            completion: Some(CompletionConfig {
                metadata_timeout_ms: Some(50),
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli_with_dir(&dir), Some(file)).unwrap();
        assert_eq!(config.user_id, 9);
        assert_eq!(config.logging_level, "debug");
        assert_eq!(config.sync.max_retries, 6);
        assert_eq!(config.sync.attempt_timeout_ms, 100);
        assert_eq!(config.sync.initial_backoff_ms, 250);
        assert_eq!(config.completion.metadata_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_missing_db_dir_is_an_error() {
        let cli = CliConfig {
            user_id: 1,
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, None).is_err());

        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/definitely/not/here")),
            user_id: 1,
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        let dir = TempDir::new().unwrap();
        let file = FileConfig {
            sync: Some(SyncConfig {
                backoff_multiplier: Some(0.5),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli_with_dir(&dir), Some(file)).is_err());
    }

    #[test]
    fn test_rejects_zero_user_id() {
        let dir = TempDir::new().unwrap();
        let cli = CliConfig {
            user_id: 0,
            ..cli_with_dir(&dir)
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }
}
