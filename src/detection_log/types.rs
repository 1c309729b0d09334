//! Detection and alert records

use crate::detector::PixelBox;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bounding box normalized to the source frame, unit-interval coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl NormalizedBox {
    /// Normalize a pixel-space box against the frame dimensions.
    ///
    /// Coordinates are clamped to the unit square and kept ordered, so the
    /// result is valid regardless of what the model returned.
    pub fn from_pixels(bbox: PixelBox, width: u32, height: u32) -> Self {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;

        let x1 = (bbox.x1 / w).clamp(0.0, 1.0);
        let y1 = (bbox.y1 / h).clamp(0.0, 1.0);
        let x2 = (bbox.x2 / w).clamp(0.0, 1.0);
        let y2 = (bbox.y2 / h).clamp(0.0, 1.0);

        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }
}

/// Persisted detection, immutable once written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub object_class: String,
    pub confidence: f32,
    pub bbox: NormalizedBox,
}

/// Persisted alert; resolution is owned by the API layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub alert_type: String,
    pub severity: String,
    pub description: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}
