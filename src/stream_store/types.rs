//! StreamStore data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Desired status of a stream
///
/// `Active` is both the operator's intent ("keep a worker on this stream")
/// and the worker's observed state once connected. Workers flip it to
/// `Error` on connect/read failure; only the API layer flips it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Active,
    Inactive,
    Error,
}

impl StreamStatus {
    /// String form stored in MySQL
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Active => "active",
            StreamStatus::Inactive => "inactive",
            StreamStatus::Error => "error",
        }
    }

    /// Parse from the stored string, unknown values map to `Inactive`
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "active" => StreamStatus::Active,
            "error" => StreamStatus::Error,
            _ => StreamStatus::Inactive,
        }
    }
}

/// Stream entity (row in the `streams` table)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Stream {
    pub id: Uuid,
    pub name: String,
    /// Source locator: all-digits device index or a network URI
    pub source: String,
    /// Stored as VARCHAR, converted via StreamStatus
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Stream {
    /// Typed view of the stored status string
    pub fn status(&self) -> StreamStatus {
        StreamStatus::from_str_lossy(&self.status)
    }
}

/// Hot-reloadable detection settings (settings category `neural_engine`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectionSettings {
    /// Minimum confidence for a candidate to be persisted as a Detection
    pub threshold: f32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}
