//! AlertDeduplicator - Sliding-Window Alert Rate Limiter
//!
//! ## Responsibilities
//!
//! - Decide emit-or-suppress for a candidate alert `(stream_id, alert_type)`
//! - Suppress when an alert of the same key was emitted within the window,
//!   regardless of its resolved state
//!
//! The window is tracked as a per-key last-emitted timestamp rather than a
//! per-decision query against recent alerts; behaviorally equivalent under
//! the one-worker-per-stream invariant and far cheaper on the store. On a
//! cold key (process restart) the decision falls back to the persistence
//! sink, so the window survives restarts.

use crate::detection_log::DetectionSink;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Default suppression window in seconds
const DEFAULT_WINDOW_SECS: i64 = 30;

/// Process-wide alert deduplication policy
pub struct AlertDeduplicator {
    sink: Arc<dyn DetectionSink>,
    window: Duration,
    /// (stream_id, alert_type) -> last emission time
    last_emitted: RwLock<HashMap<(Uuid, String), DateTime<Utc>>>,
}

impl AlertDeduplicator {
    /// Create with the default 30 s window
    pub fn new(sink: Arc<dyn DetectionSink>) -> Self {
        Self::with_window(sink, DEFAULT_WINDOW_SECS)
    }

    pub fn with_window(sink: Arc<dyn DetectionSink>, window_secs: i64) -> Self {
        Self {
            sink,
            window: Duration::seconds(window_secs),
            last_emitted: RwLock::new(HashMap::new()),
        }
    }

    /// Decide whether a new alert of this type may be emitted now.
    ///
    /// Admitting records `now` as the key's last emission; the caller is
    /// expected to persist the alert right after (single writer per stream).
    pub async fn admit(&self, stream_id: Uuid, alert_type: &str, now: DateTime<Utc>) -> Result<bool> {
        let key = (stream_id, alert_type.to_string());

        {
            let cache = self.last_emitted.read().await;
            if let Some(last) = cache.get(&key) {
                if now.signed_duration_since(*last) < self.window {
                    tracing::debug!(
                        stream_id = %stream_id,
                        alert_type = %alert_type,
                        "Alert suppressed (within dedup window)"
                    );
                    return Ok(false);
                }
            } else {
                drop(cache);
                // Cold key: consult the store so the window holds across restarts
                if let Some(recent) = self
                    .sink
                    .recent_alert(stream_id, alert_type, now - self.window)
                    .await?
                {
                    let mut cache = self.last_emitted.write().await;
                    cache.insert(key, recent.created_at);
                    tracing::debug!(
                        stream_id = %stream_id,
                        alert_type = %alert_type,
                        "Alert suppressed (recent alert found in store)"
                    );
                    return Ok(false);
                }
            }
        }

        let mut cache = self.last_emitted.write().await;
        cache.insert((stream_id, alert_type.to_string()), now);
        Ok(true)
    }

    /// Drop entries older than the window; keys for retired streams age out here
    pub async fn prune(&self, now: DateTime<Utc>) {
        let mut cache = self.last_emitted.write().await;
        let window = self.window;
        cache.retain(|_, last| now.signed_duration_since(*last) < window);
    }

    /// Number of tracked keys
    pub async fn tracked_keys(&self) -> usize {
        self.last_emitted.read().await.len()
    }
}
