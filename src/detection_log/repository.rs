//! MySQL-backed DetectionSink implementation

use crate::detection_log::{Alert, Detection, DetectionSink};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use uuid::Uuid;

/// DetectionSink over the `detections` and `alerts` tables
pub struct MySqlDetectionSink {
    pool: MySqlPool,
}

impl MySqlDetectionSink {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DetectionSink for MySqlDetectionSink {
    async fn insert_detection(&self, detection: &Detection) -> Result<()> {
        let bbox_json = serde_json::to_string(&detection.bbox)?;

        sqlx::query(
            r#"
            INSERT INTO detections (id, stream_id, timestamp, object_class, confidence, bbox_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(detection.id)
        .bind(detection.stream_id)
        .bind(detection.timestamp)
        .bind(&detection.object_class)
        .bind(detection.confidence)
        .bind(&bbox_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (id, stream_id, alert_type, severity, description, resolved, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.id)
        .bind(alert.stream_id)
        .bind(&alert.alert_type)
        .bind(&alert.severity)
        .bind(&alert.description)
        .bind(alert.resolved)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            alert_id = %alert.id,
            stream_id = %alert.stream_id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            "Alert persisted"
        );

        Ok(())
    }

    async fn recent_alert(
        &self,
        stream_id: Uuid,
        alert_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let row = sqlx::query(
            r#"
            SELECT id, stream_id, alert_type, severity, description, resolved, created_at
            FROM alerts
            WHERE stream_id = ? AND alert_type = ? AND created_at >= ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(stream_id)
        .bind(alert_type)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let created_at: chrono::NaiveDateTime = row.try_get("created_at")?;

        Ok(Some(Alert {
            id: row.try_get("id")?,
            stream_id: row.try_get("stream_id")?,
            alert_type: row.try_get("alert_type")?,
            severity: row.try_get("severity")?,
            description: row.try_get("description")?,
            resolved: row.try_get("resolved")?,
            created_at: DateTime::from_naive_utc_and_offset(created_at, Utc),
        }))
    }
}
