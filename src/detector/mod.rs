//! Detector - Object-Detection Model Boundary
//!
//! ## Responsibilities
//!
//! - Send frames to the detection model server
//! - Parse the candidate list in the response
//!
//! The model is an opaque capability: frame in, candidates out. It must not
//! mutate the frame and holds no state between calls.

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounding box in source pixel coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PixelBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Candidate produced by the model, transient (not persisted as-is)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionCandidate {
    #[serde(rename = "class")]
    pub object_class: String,
    pub confidence: f32,
    pub bbox: PixelBox,
}

/// Detection model boundary
#[async_trait]
pub trait Detector: Send + Sync {
    /// Run inference on a single encoded frame
    async fn detect(&self, frame: &[u8]) -> Result<Vec<DetectionCandidate>>;
}

/// Response envelope from the model server
#[derive(Debug, Deserialize)]
struct DetectResponse {
    detections: Vec<DetectionCandidate>,
}

/// HTTP adapter for a detection model server
pub struct HttpDetector {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDetector {
    /// Create new detector client
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    /// Check if the model server is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: &[u8]) -> Result<Vec<DetectionCandidate>> {
        let url = format!("{}/detect", self.base_url);

        let part = Part::bytes(frame.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| Error::Detector(format!("multipart build failed: {}", e)))?;
        let form = Form::new().part("image", part);

        let resp = self.client.post(&url).multipart(form).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Detector(format!(
                "model server returned {}",
                resp.status()
            )));
        }

        let body: DetectResponse = resp.json().await?;

        tracing::trace!(
            candidates = body.detections.len(),
            "Inference completed"
        );

        Ok(body.detections)
    }
}
