use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{instrument, warn};

use super::{parse_timestamp, ProgressError, ProgressStore};
use crate::model::ProgressState;

/// Progress backend holding a single row in a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteProgressStore {
    pool: SqlitePool,
    url: String,
}

impl SqliteProgressStore {
    pub async fn connect(database_url: &str) -> Result<Self, ProgressError> {
        let url = prepare_sqlite_url(database_url);
        let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
        // One writer per run; a single connection also keeps `sqlite::memory:` coherent.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous=FULL;")
            .execute(&pool)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool, url })
    }

    /// Open an existing database without creating, migrating or reconfiguring it.
    pub async fn connect_read_only(database_url: &str) -> Result<Self, ProgressError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(false)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            url: database_url.to_string(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn try_load(&self) -> Result<Option<ProgressState>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT next_day, last_topic, last_published_at, last_post_url, last_image_attached \
             FROM progress WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let next_day: i64 = match row.try_get("next_day") {
            Ok(v) => v,
            Err(err) => {
                warn!(?err, "non-numeric next_day in progress table");
                return Ok(None);
            }
        };
        if next_day < 1 || next_day > i64::from(u32::MAX) {
            return Ok(None);
        }
        let published: Option<String> = row.try_get("last_published_at").unwrap_or(None);

        Ok(Some(ProgressState {
            next_day: next_day as u32,
            last_topic: row.try_get("last_topic").unwrap_or_default(),
            last_published_at: published.as_deref().and_then(parse_timestamp),
            last_post_url: row.try_get("last_post_url").unwrap_or(None),
            last_image_attached: row.try_get("last_image_attached").unwrap_or(None),
        }))
    }
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    #[instrument(skip_all)]
    async fn load(&self) -> ProgressState {
        match self.try_load().await {
            Ok(Some(state)) => state,
            Ok(None) => ProgressState::default(),
            Err(err) => {
                warn!(?err, "failed to read progress table; starting over");
                ProgressState::default()
            }
        }
    }

    #[instrument(skip_all)]
    async fn commit(&self, state: &ProgressState) -> Result<(), ProgressError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO progress (id, next_day, last_topic, last_published_at, last_post_url, last_image_attached, updated_at) \
             VALUES (1, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) \
             ON CONFLICT(id) DO UPDATE SET \
               next_day = excluded.next_day, \
               last_topic = excluded.last_topic, \
               last_published_at = excluded.last_published_at, \
               last_post_url = excluded.last_post_url, \
               last_image_attached = excluded.last_image_attached, \
               updated_at = excluded.updated_at",
        )
        .bind(i64::from(state.next_day))
        .bind(&state.last_topic)
        .bind(state.last_published_at.map(|t| t.to_rfc3339()))
        .bind(state.last_post_url.as_deref())
        .bind(state.last_image_attached)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    fn location(&self) -> String {
        self.url.clone()
    }
}

/// Expand a leading `~/` in file-backed SQLite URLs and make sure the parent directory
/// exists. In-memory URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded}");
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}
