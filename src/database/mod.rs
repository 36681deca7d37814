use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::config::DatabaseConfig;

/// Camera row as managed by the surrounding application. This service
/// only ever reads: the CRUD side of the store belongs to the web
/// application, not to the session manager.
#[derive(Debug, Clone, Serialize)]
pub struct CameraRecord {
    pub id: String,
    pub name: String,
    pub source_url: String,
    pub is_online: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait CameraStore: Send + Sync {
    async fn get_camera(&self, id: &str) -> crate::Result<Option<CameraRecord>>;
    async fn list_cameras(&self) -> crate::Result<Vec<CameraRecord>>;
}

pub struct SqliteCameraStore {
    pool: SqlitePool,
}

impl SqliteCameraStore {
    pub async fn connect(config: &DatabaseConfig) -> crate::Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "sqlite://cameras.db".to_string());

        let options = SqliteConnectOptions::new()
            .filename(url.trim_start_matches("sqlite://"))
            // The schema is owned by the web application; a missing file
            // is a deployment error, not something to paper over.
            .create_if_missing(false)
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.unwrap_or(5))
            .connect_with(options)
            .await?;

        info!(url = %url, "camera store connected");
        Ok(Self { pool })
    }

    #[cfg(test)]
    fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> CameraRecord {
    CameraRecord {
        id: row.get("id"),
        name: row.get("name"),
        source_url: row.get("source_url"),
        is_online: row.get("is_online"),
        last_checked_at: row.get("last_checked_at"),
    }
}

#[async_trait]
impl CameraStore for SqliteCameraStore {
    async fn get_camera(&self, id: &str) -> crate::Result<Option<CameraRecord>> {
        let row = sqlx::query(
            "SELECT id, name, source_url, is_online, last_checked_at \
             FROM cameras WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(record_from_row))
    }

    async fn list_cameras(&self) -> crate::Result<Vec<CameraRecord>> {
        let rows = sqlx::query(
            "SELECT id, name, source_url, is_online, last_checked_at \
             FROM cameras ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(record_from_row).collect())
    }
}
