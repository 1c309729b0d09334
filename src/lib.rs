//! Sentinel Camserver
//!
//! Supervises video streams against a desired-state store: one worker per
//! active stream, frame capture over ffmpeg, HTTP-served live view, object
//! detection with persisted detections and deduplicated alerts.

pub mod alert_dedup;
pub mod detection_log;
pub mod detector;
pub mod error;
pub mod frame_cache;
pub mod frame_source;
pub mod orchestrator;
pub mod state;
pub mod stream_store;
pub mod stream_worker;
pub mod web_api;

#[cfg(test)]
pub mod testutil;
