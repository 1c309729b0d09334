//! LiveFrameCache - Most-Recent Frame per Stream
//!
//! ## Responsibilities
//!
//! - Hold the latest encoded frame for each stream for live viewing
//! - Last-writer-wins, single writer per key (the owning worker)
//! - Entries are removed when their worker terminates, on every exit path
//!
//! Absence is a normal state (stream not yet producing frames); readers poll
//! rather than treat it as an error. Nothing here is persisted.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Cached frame entry
#[derive(Debug, Clone)]
struct CacheEntry {
    /// JPEG bytes
    data: Vec<u8>,
    updated_at: DateTime<Utc>,
}

/// Process-wide live frame cache
pub struct LiveFrameCache {
    entries: RwLock<HashMap<Uuid, CacheEntry>>,
}

impl LiveFrameCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Publish the most recent frame for a stream, overwriting any prior entry
    pub async fn put(&self, stream_id: Uuid, data: Vec<u8>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            stream_id,
            CacheEntry {
                data,
                updated_at: Utc::now(),
            },
        );
    }

    /// Most recent frame for a stream, None when not yet producing
    pub async fn get(&self, stream_id: Uuid) -> Option<Vec<u8>> {
        self.entries
            .read()
            .await
            .get(&stream_id)
            .map(|e| e.data.clone())
    }

    /// Timestamp of the last write for a stream
    pub async fn last_updated(&self, stream_id: Uuid) -> Option<DateTime<Utc>> {
        self.entries
            .read()
            .await
            .get(&stream_id)
            .map(|e| e.updated_at)
    }

    /// Drop a stream's entry; called by the owning worker on termination
    pub async fn remove(&self, stream_id: Uuid) {
        let mut entries = self.entries.write().await;
        if entries.remove(&stream_id).is_some() {
            tracing::debug!(stream_id = %stream_id, "Live frame entry removed");
        }
    }

    /// Number of streams currently publishing frames
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for LiveFrameCache {
    fn default() -> Self {
        Self::new()
    }
}
