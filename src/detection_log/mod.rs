//! DetectionLog - Persistence Sink for Detections and Alerts
//!
//! ## Responsibilities
//!
//! - Persist detections (immutable once written)
//! - Persist alerts and answer the recency query the deduplicator needs
//!
//! Alert resolution is mutated by the API layer only; workers never touch
//! an alert after inserting it.

mod repository;
mod types;

pub use repository::MySqlDetectionSink;
pub use types::{Alert, Detection, NormalizedBox};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Persistence sink boundary
#[async_trait]
pub trait DetectionSink: Send + Sync {
    async fn insert_detection(&self, detection: &Detection) -> Result<()>;

    async fn insert_alert(&self, alert: &Alert) -> Result<()>;

    /// Most recent alert of the given type for a stream created at or after
    /// `since`, if any. Resolved state is deliberately ignored.
    async fn recent_alert(
        &self,
        stream_id: Uuid,
        alert_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Alert>>;
}
