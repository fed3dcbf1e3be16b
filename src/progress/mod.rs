//! Progress store: the durable calendar cursor.
//!
//! Two backends are provided:
//! - `file`: a JSON record (`status.json`) replaced atomically through a temp file.
//! - `sqlite`: a single-row table written inside a transaction.
//!
//! Loading never fails. A missing, unreadable or structurally invalid record yields
//! `ProgressState::default()` so a corrupted cursor restarts the calendar instead of
//! blocking every future run.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::{Config, ProgressBackend};
use crate::model::ProgressState;

pub mod sqlite;

pub use sqlite::SqliteProgressStore;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode progress record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Current cursor, or the default state when nothing valid is persisted.
    async fn load(&self) -> ProgressState;

    /// Persist `state`, replacing the previous record atomically.
    async fn commit(&self, state: &ProgressState) -> Result<(), ProgressError>;

    /// Human-readable location for logs.
    fn location(&self) -> String;
}

/// Open the backend selected in configuration.
pub async fn open(cfg: &Config) -> Result<Arc<dyn ProgressStore>, ProgressError> {
    let location = cfg.progress_location();
    let store: Arc<dyn ProgressStore> = match cfg.app.progress.backend {
        ProgressBackend::File => Arc::new(JsonFileStore::new(location)),
        ProgressBackend::Sqlite => Arc::new(SqliteProgressStore::connect(&location).await?),
    };
    Ok(store)
}

/// Open the configured backend for inspection only; nothing is created or migrated.
pub async fn open_read_only(cfg: &Config) -> Result<Arc<dyn ProgressStore>, ProgressError> {
    let location = cfg.progress_location();
    let store: Arc<dyn ProgressStore> = match cfg.app.progress.backend {
        ProgressBackend::File => Arc::new(JsonFileStore::new(location)),
        ProgressBackend::Sqlite => Arc::new(SqliteProgressStore::connect_read_only(&location).await?),
    };
    Ok(store)
}

/// JSON file backend. Compatible with the legacy `last_processed` / `last_published` keys.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "status.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ProgressStore for JsonFileStore {
    async fn load(&self) -> ProgressState {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no progress record yet; starting at day 1");
                return ProgressState::default();
            }
            Err(err) => {
                warn!(path = %self.path.display(), ?err, "unreadable progress record; starting over");
                return ProgressState::default();
            }
        };
        match parse_record(&raw) {
            Some(state) => state,
            None => {
                warn!(path = %self.path.display(), "invalid progress record; starting over");
                ProgressState::default()
            }
        }
    }

    async fn commit(&self, state: &ProgressState) -> Result<(), ProgressError> {
        let io_err = |path: &Path| {
            let path = path.display().to_string();
            move |source| ProgressError::Io { path, source }
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }

        let body = serde_json::to_string_pretty(state)?;
        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err(tmp.as_path()))?;
        file.write_all(body.as_bytes()).await.map_err(io_err(tmp.as_path()))?;
        file.write_all(b"\n").await.map_err(io_err(tmp.as_path()))?;
        file.sync_all().await.map_err(io_err(tmp.as_path()))?;
        drop(file);

        if let Err(err) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(self.path.as_path())(err));
        }
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Parse a persisted record leniently: only a positive integer `next_day` is required.
pub fn parse_record(raw: &str) -> Option<ProgressState> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let obj = value.as_object()?;

    let next_day = obj
        .get("next_day")?
        .as_u64()
        .filter(|d| *d >= 1 && *d <= u64::from(u32::MAX))? as u32;

    let last_topic = obj
        .get("last_topic")
        .or_else(|| obj.get("last_processed"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let last_published_at = obj
        .get("last_published_at")
        .or_else(|| obj.get("last_published"))
        .and_then(Value::as_str)
        .and_then(parse_timestamp);

    Some(ProgressState {
        next_day,
        last_topic,
        last_published_at,
        last_post_url: obj
            .get("last_post_url")
            .and_then(Value::as_str)
            .map(str::to_string),
        last_image_attached: obj.get("last_image_attached").and_then(Value::as_bool),
    })
}

/// RFC 3339, or a naive ISO timestamp interpreted as UTC.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_yields_default() {
        let td = tempdir().unwrap();
        let store = JsonFileStore::new(td.path().join("status.json"));
        assert_eq!(store.load().await, ProgressState::default());
    }

    #[tokio::test]
    async fn commit_then_load_round_trips_and_leaves_no_temp_file() {
        let td = tempdir().unwrap();
        let path = td.path().join("nested").join("status.json");
        let store = JsonFileStore::new(&path);
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
        let state = ProgressState::after_publish(2, "Wallets", 3, now)
            .with_post("https://blog.example/p/2", true);

        store.commit(&state).await.unwrap();

        assert_eq!(store.load().await, state);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn commit_replaces_previous_record() {
        let td = tempdir().unwrap();
        let store = JsonFileStore::new(td.path().join("status.json"));
        let now = Utc::now();
        store
            .commit(&ProgressState::after_publish(1, "a", 3, now))
            .await
            .unwrap();
        store
            .commit(&ProgressState::after_publish(2, "b", 3, now))
            .await
            .unwrap();
        let loaded = store.load().await;
        assert_eq!(loaded.next_day, 3);
        assert_eq!(loaded.last_topic, "b");
    }

    #[tokio::test]
    async fn corrupt_records_yield_default() {
        let td = tempdir().unwrap();
        let path = td.path().join("status.json");
        let store = JsonFileStore::new(&path);
        for raw in [
            "{not json",
            "[]",
            r#"{"last_topic": "x"}"#,
            r#"{"next_day": "three"}"#,
            r#"{"next_day": 0}"#,
            r#"{"next_day": -4}"#,
            r#"{"next_day": 2.5}"#,
        ] {
            std::fs::write(&path, raw).unwrap();
            assert_eq!(store.load().await, ProgressState::default(), "input: {raw}");
        }
    }

    #[test]
    fn legacy_keys_are_accepted() {
        let raw = r#"{"next_day": 5, "last_processed": "Old topic", "last_published": "2024-11-02T06:00:12.345678", "last_image_source": "ZIP"}"#;
        let state = parse_record(raw).unwrap();
        assert_eq!(state.next_day, 5);
        assert_eq!(state.last_topic, "Old topic");
        assert_eq!(
            state.last_published_at.unwrap().format("%Y-%m-%d %H:%M").to_string(),
            "2024-11-02 06:00"
        );
    }

    #[test]
    fn bad_timestamp_keeps_cursor() {
        let state = parse_record(r#"{"next_day": 4, "last_published_at": "yesterday"}"#).unwrap();
        assert_eq!(state.next_day, 4);
        assert_eq!(state.last_published_at, None);
    }
}
