//! MySQL-backed StreamStore implementation

use crate::error::Result;
use crate::stream_store::{DetectionSettings, Stream, StreamStatus, StreamStore};
use async_trait::async_trait;
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use uuid::Uuid;

/// StreamStore over the `streams` and `system_settings` tables
pub struct MySqlStreamStore {
    pool: MySqlPool,
}

impl MySqlStreamStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StreamStore for MySqlStreamStore {
    async fn list_streams(&self) -> Result<Vec<Stream>> {
        let streams = sqlx::query_as::<_, Stream>(
            "SELECT id, name, source, status, created_at FROM streams ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(streams)
    }

    async fn list_active(&self) -> Result<Vec<Stream>> {
        let streams = sqlx::query_as::<_, Stream>(
            "SELECT id, name, source, status, created_at FROM streams WHERE status = 'active'",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(streams)
    }

    async fn get_stream(&self, id: Uuid) -> Result<Option<Stream>> {
        let stream = sqlx::query_as::<_, Stream>(
            "SELECT id, name, source, status, created_at FROM streams WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stream)
    }

    async fn set_status(&self, id: Uuid, status: StreamStatus) -> Result<()> {
        sqlx::query("UPDATE streams SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::debug!(stream_id = %id, status = status.as_str(), "Stream status updated");

        Ok(())
    }

    async fn get_detection_settings(&self) -> Result<DetectionSettings> {
        let row = sqlx::query(
            "SELECT settings FROM system_settings WHERE category = 'neural_engine'",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(DetectionSettings::default());
        };

        let settings_json: String = row.try_get("settings")?;
        let settings: serde_json::Value = serde_json::from_str(&settings_json)?;

        // Threshold may be stored as a number or a stringified number
        let threshold = settings["threshold"]
            .as_f64()
            .or_else(|| settings["threshold"].as_str().and_then(|s| s.parse().ok()))
            .map(|t| t as f32)
            .unwrap_or(DetectionSettings::default().threshold);

        Ok(DetectionSettings { threshold })
    }
}
