//! StreamStore - Desired-State Store for video streams
//!
//! ## Responsibilities
//!
//! - Authoritative record of what each stream should be doing
//! - Polled by the orchestrator and by workers, never pushed to
//! - Detection threshold settings (hot-reloadable)
//!
//! Workers write status transitions (connect success/failure) back through
//! the same interface; the API layer owns all other mutations.

mod repository;
mod types;

pub use repository::MySqlStreamStore;
pub use types::{DetectionSettings, Stream, StreamStatus};

use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Desired-state store boundary
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Full snapshot of all streams
    async fn list_streams(&self) -> Result<Vec<Stream>>;

    /// Streams whose desired status is `active`
    async fn list_active(&self) -> Result<Vec<Stream>>;

    /// Single stream lookup
    async fn get_stream(&self, id: Uuid) -> Result<Option<Stream>>;

    /// Write the observed status for a stream
    async fn set_status(&self, id: Uuid, status: StreamStatus) -> Result<()>;

    /// Current detection settings, defaults when unset
    async fn get_detection_settings(&self) -> Result<DetectionSettings>;
}
