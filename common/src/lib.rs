/*!
common/src/lib.rs

Shared configuration types and database bootstrap helpers for feedlens.

This crate is deliberately thin: it knows how to load and merge TOML
configuration and how to open a correctly-pragma'd SQLite connection
pool. Schema and migrations live in the `feedlens` crate, which owns
the pipeline that uses them.
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Database configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/feedlens.db").
    pub path: String,
}

/// Feed-update cadence and cleanup sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often `UpdateAllFeeds` is triggered, in seconds.
    pub update_interval_seconds: Option<u64>,
    /// How often the cleanup pass runs, in seconds. 0 disables cleanup.
    pub cleanup_interval_seconds: Option<u64>,
    /// Age (in days) beyond which unliked, low-scoring items are eligible for cleanup.
    pub cleanup_age_days: Option<i64>,
    /// Minimum relevance score that exempts an item from cleanup regardless of age.
    pub cleanup_min_score: Option<f64>,
}

/// Worker pool and channel sizing, shared by the feed-update and item-processing stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub max_workers: Option<usize>,
    pub process_channel_capacity: Option<usize>,
    pub preference_update_threshold: Option<i64>,
}

/// Politeness / fetching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolitenessConfig {
    pub fetch_timeout_seconds: Option<u64>,
    pub extract_timeout_seconds: Option<u64>,
}

/// Remote LLM endpoint configuration (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
}

/// LLM top-level config. `background` drives classification; `interactive` is reserved
/// for future chat/search-assist use and is otherwise unused by this pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "remote" | "none"
    pub remote: Option<RemoteLlmConfig>,
    pub background: Option<RemoteLlmConfig>,
    pub interactive: Option<RemoteLlmConfig>,
}

/// Feedback score-adjustment weights, tunable instead of hardcoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub like_delta: Option<f64>,
    pub dislike_delta: Option<f64>,
    pub preference_summary_threshold: Option<i64>,
}

/// Top-level application configuration, deserialized from config.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub politeness: Option<PolitenessConfig>,
    pub llm: Option<LlmConfig>,
    pub scoring: Option<ScoringConfig>,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/feedlens.db".to_string(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            update_interval_seconds: Some(1800),
            cleanup_interval_seconds: Some(86_400),
            cleanup_age_days: Some(30),
            cleanup_min_score: Some(5.0),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: Some(5),
            process_channel_capacity: Some(100),
            preference_update_threshold: Some(25),
        }
    }
}

impl Config {
    /// Load configuration from a single TOML file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await.with_context(|| {
                    format!("Failed to read default config: {}", path.display())
                })?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await.with_context(|| {
                    format!("Failed to read override config: {}", path.display())
                })?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value
            .try_into()
            .context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool with the pragmas the pipeline depends on:
/// foreign keys on, WAL journal, synchronous=NORMAL, a 64MB page cache and a 5s
/// busy timeout (so the in-process retry policy rarely needs to fire at all).
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true)
        .pragma("cache_size", "-64000");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[tokio::test]
    async fn config_from_string_and_db_pool() {
        let toml = r#"
            [database]
            path = "data/test.db"

            [scheduler]
            update_interval_seconds = 900
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");
        assert_eq!(cfg.scheduler.update_interval_seconds, Some(900));

        let now = SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time")
            .as_millis();
        let dir = std::env::temp_dir().join(format!("feedlens_test_{}", now));
        let _ = tokio::fs::create_dir_all(&dir).await;
        let db_path = dir.join("feedlens.db");
        let db_path_str = db_path.to_string_lossy().to_string();

        let pool = init_db_pool(&db_path_str).await.expect("init pool");
        let conn = pool.acquire().await.expect("acquire conn");
        drop(conn);
    }

    #[tokio::test]
    async fn load_with_defaults_merges_override() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");

        tokio::fs::write(
            &default_path,
            r#"
            [database]
            path = "data/default.db"
            [scheduler]
            update_interval_seconds = 1800
            "#,
        )
        .await
        .unwrap();

        tokio::fs::write(
            &override_path,
            r#"
            [database]
            path = "data/override.db"
            "#,
        )
        .await
        .unwrap();

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load config");

        assert_eq!(cfg.database.path, "data/override.db");
        assert_eq!(cfg.scheduler.update_interval_seconds, Some(1800));
    }
}
