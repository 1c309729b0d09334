//! StreamWorker - Per-Stream Ingestion Pipeline
//!
//! ## Responsibilities
//!
//! - Own one stream end-to-end: connect, read, detect, persist, alert
//! - Publish every frame to the live cache
//! - Poll its own desired status and self-terminate; nothing cancels it
//!   from outside
//!
//! ## State machine
//!
//! `Connecting -> Active -> {Stopped | Error}`. Both terminal paths release
//! the capture handle and evict the live-cache entry, whatever went wrong.

use crate::alert_dedup::AlertDeduplicator;
use crate::detection_log::{Alert, Detection, DetectionSink, NormalizedBox};
use crate::detector::Detector;
use crate::frame_cache::LiveFrameCache;
use crate::frame_source::{Frame, FrameSource, SourceConfig, SourceOpener};
use crate::stream_store::{Stream, StreamStatus, StreamStore};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Terminal state of a worker run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Desired status flipped away from active; clean shutdown
    Stopped,
    /// Connect failure, read failure, end-of-stream, or a fault caught at
    /// the worker boundary
    Error,
}

/// Worker policy knobs; the defaults match the tuned production cadence
#[derive(Debug, Clone)]
pub struct WorkerPolicy {
    /// Re-read desired status and threshold every N frames. Coarser checks
    /// trade stop responsiveness for reduced store-read pressure.
    pub control_check_frames: u64,
    /// Run inference on every Nth frame
    pub detect_every_frames: u64,
    /// Object class that can raise an alert
    pub alert_class: String,
    /// Confidence floor for alerting, independent of the detection threshold
    pub alert_min_confidence: f32,
    pub alert_type: String,
    pub alert_severity: String,
    /// Frame source open/read tunables
    pub source: SourceConfig,
}

impl Default for WorkerPolicy {
    fn default() -> Self {
        Self {
            control_check_frames: 60,
            detect_every_frames: 5,
            alert_class: "person".to_string(),
            alert_min_confidence: 0.7,
            alert_type: "Unauthorized Person".to_string(),
            alert_severity: "high".to_string(),
            source: SourceConfig::default(),
        }
    }
}

/// Decision from a control check
enum ControlDecision {
    Continue { threshold: f32 },
    Stop,
}

/// One stream's worker
pub struct StreamWorker {
    stream: Stream,
    store: Arc<dyn StreamStore>,
    sink: Arc<dyn DetectionSink>,
    detector: Arc<dyn Detector>,
    cache: Arc<LiveFrameCache>,
    dedup: Arc<AlertDeduplicator>,
    opener: Arc<dyn SourceOpener>,
    policy: WorkerPolicy,
}

impl StreamWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: Stream,
        store: Arc<dyn StreamStore>,
        sink: Arc<dyn DetectionSink>,
        detector: Arc<dyn Detector>,
        cache: Arc<LiveFrameCache>,
        dedup: Arc<AlertDeduplicator>,
        opener: Arc<dyn SourceOpener>,
        policy: WorkerPolicy,
    ) -> Self {
        Self {
            stream,
            store,
            sink,
            detector,
            cache,
            dedup,
            opener,
            policy,
        }
    }

    /// Run the worker to a terminal state. Cleanup happens on every exit
    /// path: the source is closed and the live-cache entry removed.
    pub async fn run(self) -> WorkerExit {
        let stream_id = self.stream.id;

        tracing::info!(
            stream_id = %stream_id,
            name = %self.stream.name,
            source = %self.stream.source,
            "Worker connecting"
        );

        // Connecting
        let mut source = match self
            .opener
            .open(&stream_id.to_string(), &self.stream.source, &self.policy.source)
            .await
        {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(
                    stream_id = %stream_id,
                    name = %self.stream.name,
                    error = %e,
                    "Failed to open stream source"
                );
                self.mark_error().await;
                self.cache.remove(stream_id).await;
                return WorkerExit::Error;
            }
        };

        let exit = match self.enter_active().await {
            Ok(threshold) => self.run_active(source.as_mut(), threshold).await,
            Err(e) => {
                tracing::error!(
                    stream_id = %stream_id,
                    error = %e,
                    "Failed to enter active state"
                );
                self.mark_error().await;
                WorkerExit::Error
            }
        };

        // Unconditional cleanup, all exit paths converge here
        source.close().await;
        self.cache.remove(stream_id).await;

        tracing::info!(
            stream_id = %stream_id,
            name = %self.stream.name,
            exit = ?exit,
            "Worker terminated"
        );

        exit
    }

    /// Record the successful connect and load the initial threshold
    async fn enter_active(&self) -> crate::error::Result<f32> {
        self.store
            .set_status(self.stream.id, StreamStatus::Active)
            .await?;

        let threshold = self
            .store
            .get_detection_settings()
            .await
            .map(|s| s.threshold)?;

        tracing::info!(
            stream_id = %self.stream.id,
            name = %self.stream.name,
            threshold = threshold,
            "Connection established, worker active"
        );

        Ok(threshold)
    }

    /// Active-state loop; returns the terminal state
    async fn run_active(&self, source: &mut dyn FrameSource, mut threshold: f32) -> WorkerExit {
        let stream_id = self.stream.id;
        let mut frame_count: u64 = 0;

        loop {
            if frame_count % self.policy.control_check_frames == 0 {
                match self.control_check().await {
                    Ok(ControlDecision::Continue { threshold: t }) => threshold = t,
                    Ok(ControlDecision::Stop) => {
                        tracing::info!(
                            stream_id = %stream_id,
                            name = %self.stream.name,
                            "Stop signal received"
                        );
                        return WorkerExit::Stopped;
                    }
                    Err(e) => {
                        // Store unreachable mid-run; terminate like a read failure
                        tracing::error!(
                            stream_id = %stream_id,
                            error = %e,
                            "Control check failed"
                        );
                        self.mark_error().await;
                        return WorkerExit::Error;
                    }
                }
            }

            let frame = match source.read_frame().await {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(
                        stream_id = %stream_id,
                        name = %self.stream.name,
                        error = %e,
                        "Connection lost"
                    );
                    self.mark_error().await;
                    return WorkerExit::Error;
                }
            };

            // Live preview first so viewers see frames even when inference lags
            self.cache.put(stream_id, frame.data.clone()).await;

            frame_count += 1;

            if frame_count % self.policy.detect_every_frames == 0 {
                if let Err(e) = self.process_frame(&frame, threshold).await {
                    // Fault boundary: nothing inside the loop may take down
                    // the orchestrator or sibling workers
                    tracing::error!(
                        stream_id = %stream_id,
                        error = %e,
                        "Frame processing failed"
                    );
                    self.mark_error().await;
                    return WorkerExit::Error;
                }
            }

            // Let sibling workers and the orchestrator breathe
            tokio::task::yield_now().await;
        }
    }

    /// Re-read desired status and threshold from the store
    async fn control_check(&self) -> crate::error::Result<ControlDecision> {
        let stream = self.store.get_stream(self.stream.id).await?;

        let still_active = stream
            .map(|s| s.status() == StreamStatus::Active)
            .unwrap_or(false);
        if !still_active {
            return Ok(ControlDecision::Stop);
        }

        let settings = self.store.get_detection_settings().await?;
        Ok(ControlDecision::Continue {
            threshold: settings.threshold,
        })
    }

    /// Run inference on one frame; persist qualifying detections and alerts
    async fn process_frame(&self, frame: &Frame, threshold: f32) -> crate::error::Result<()> {
        let candidates = self.detector.detect(&frame.data).await?;

        for candidate in candidates {
            if candidate.confidence <= threshold {
                continue;
            }

            let now = Utc::now();
            let bbox = NormalizedBox::from_pixels(candidate.bbox, frame.width, frame.height);

            let detection = Detection {
                id: Uuid::new_v4(),
                stream_id: self.stream.id,
                timestamp: now,
                object_class: candidate.object_class.clone(),
                confidence: candidate.confidence,
                bbox,
            };
            self.sink.insert_detection(&detection).await?;

            tracing::debug!(
                stream_id = %self.stream.id,
                object_class = %candidate.object_class,
                confidence = candidate.confidence,
                "Detection persisted"
            );

            if candidate.object_class == self.policy.alert_class
                && candidate.confidence > self.policy.alert_min_confidence
                && self
                    .dedup
                    .admit(self.stream.id, &self.policy.alert_type, now)
                    .await?
            {
                let alert = Alert {
                    id: Uuid::new_v4(),
                    stream_id: self.stream.id,
                    alert_type: self.policy.alert_type.clone(),
                    severity: self.policy.alert_severity.clone(),
                    description: format!(
                        "Neural pattern match: {} presence on {}.",
                        candidate.object_class, self.stream.name
                    ),
                    resolved: false,
                    created_at: now,
                };
                self.sink.insert_alert(&alert).await?;
            }
        }

        Ok(())
    }

    /// Best-effort error status write; the store may itself be the problem
    async fn mark_error(&self) {
        if let Err(e) = self.store.set_status(self.stream.id, StreamStatus::Error).await {
            tracing::warn!(
                stream_id = %self.stream.id,
                error = %e,
                "Could not record error status"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectionCandidate, PixelBox};
    use crate::testutil::{
        test_frame, test_stream, InMemorySink, InMemoryStreamStore, ScriptedOpener,
        ScriptedSource, StaticDetector,
    };
    use std::sync::atomic::Ordering;

    fn candidate(class: &str, confidence: f32) -> DetectionCandidate {
        DetectionCandidate {
            object_class: class.to_string(),
            confidence,
            bbox: PixelBox { x1: 64.0, y1: 48.0, x2: 320.0, y2: 240.0 },
        }
    }

    /// Policy tightened so tests run in a handful of frames
    fn test_policy() -> WorkerPolicy {
        WorkerPolicy {
            control_check_frames: 4,
            detect_every_frames: 1,
            ..WorkerPolicy::default()
        }
    }

    struct Harness {
        store: Arc<InMemoryStreamStore>,
        sink: Arc<InMemorySink>,
        cache: Arc<LiveFrameCache>,
    }

    fn worker_with(
        stream: Stream,
        detector: StaticDetector,
        opener: ScriptedOpener,
        policy: WorkerPolicy,
    ) -> (StreamWorker, Harness) {
        let store = Arc::new(InMemoryStreamStore::new());
        let sink = Arc::new(InMemorySink::new());
        let cache = Arc::new(LiveFrameCache::new());
        let dedup = Arc::new(AlertDeduplicator::new(sink.clone()));

        let worker = StreamWorker::new(
            stream,
            store.clone(),
            sink.clone(),
            Arc::new(detector),
            cache.clone(),
            dedup,
            Arc::new(opener),
            policy,
        );

        (worker, Harness { store, sink, cache })
    }

    #[tokio::test]
    async fn test_connect_failure_marks_error() {
        let stream = test_stream("front-door", "rtsp://unreachable/stream", StreamStatus::Active);
        let id = stream.id;
        let (worker, h) = worker_with(
            stream.clone(),
            StaticDetector::always(vec![]),
            ScriptedOpener::failing(),
            test_policy(),
        );
        h.store.insert(stream).await;

        let exit = worker.run().await;

        assert_eq!(exit, WorkerExit::Error);
        assert_eq!(h.store.status_of(id).await, Some(StreamStatus::Error));
        assert!(h.cache.get(id).await.is_none());
    }

    #[tokio::test]
    async fn test_end_of_stream_marks_error_and_cleans_up() {
        let stream = test_stream("lobby", "0", StreamStatus::Active);
        let id = stream.id;
        let (source, closed) = ScriptedSource::finite(vec![test_frame(640, 480); 3]);
        let (worker, h) = worker_with(
            stream.clone(),
            StaticDetector::always(vec![]),
            ScriptedOpener::new(vec![Box::new(source)]),
            test_policy(),
        );
        h.store.insert(stream).await;

        let exit = worker.run().await;

        assert_eq!(exit, WorkerExit::Error);
        assert_eq!(h.store.status_of(id).await, Some(StreamStatus::Error));
        assert!(closed.load(Ordering::SeqCst), "source must be released");
        assert!(h.cache.get(id).await.is_none(), "cache entry must be evicted");
    }

    #[tokio::test]
    async fn test_stop_signal_honored_within_control_interval() {
        let stream = test_stream("garage", "1", StreamStatus::Active);
        let id = stream.id;
        let (source, closed) = ScriptedSource::endless(vec![test_frame(640, 480)]);
        let (worker, h) = worker_with(
            stream.clone(),
            StaticDetector::always(vec![]),
            ScriptedOpener::new(vec![Box::new(source)]),
            test_policy(),
        );
        h.store.insert(stream).await;

        let store = h.store.clone();
        let handle = tokio::spawn(worker.run());

        // Let the worker pass its first control check, then flip the status
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        store.set_status(id, StreamStatus::Inactive).await.unwrap();

        let exit = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("worker must stop within the control interval")
            .unwrap();

        assert_eq!(exit, WorkerExit::Stopped);
        assert!(closed.load(Ordering::SeqCst));
        assert!(h.cache.get(id).await.is_none());
        // Clean stop does not touch the stored status
        assert_eq!(h.store.status_of(id).await, Some(StreamStatus::Inactive));
    }

    #[tokio::test]
    async fn test_under_threshold_candidates_not_persisted() {
        let stream = test_stream("yard", "2", StreamStatus::Active);
        let (source, _) = ScriptedSource::finite(vec![test_frame(640, 480)]);
        let (worker, h) = worker_with(
            stream.clone(),
            StaticDetector::always(vec![candidate("cat", 0.4), candidate("dog", 0.5)]),
            ScriptedOpener::new(vec![Box::new(source)]),
            test_policy(),
        );
        h.store.insert(stream).await;
        h.store.set_threshold(0.5).await;

        worker.run().await;

        // 0.4 < threshold, 0.5 == threshold: neither qualifies
        assert!(h.sink.detections().await.is_empty());
    }

    #[tokio::test]
    async fn test_qualifying_detection_is_normalized_and_persisted() {
        let stream = test_stream("dock", "3", StreamStatus::Active);
        let id = stream.id;
        let (source, _) = ScriptedSource::finite(vec![test_frame(640, 480)]);
        let (worker, h) = worker_with(
            stream.clone(),
            StaticDetector::always(vec![candidate("car", 0.6)]),
            ScriptedOpener::new(vec![Box::new(source)]),
            test_policy(),
        );
        h.store.insert(stream).await;
        h.store.set_threshold(0.5).await;

        worker.run().await;

        let detections = h.sink.detections().await;
        assert_eq!(detections.len(), 1);
        let det = &detections[0];
        assert_eq!(det.stream_id, id);
        assert_eq!(det.object_class, "car");

        // 64/640, 48/480, 320/640, 240/480
        assert!((det.bbox.x1 - 0.1).abs() < 1e-6);
        assert!((det.bbox.y1 - 0.1).abs() < 1e-6);
        assert!((det.bbox.x2 - 0.5).abs() < 1e-6);
        assert!((det.bbox.y2 - 0.5).abs() < 1e-6);
        assert!(det.bbox.x1 <= det.bbox.x2 && det.bbox.x2 <= 1.0);

        // "car" never alerts
        assert!(h.sink.alerts().await.is_empty());
    }

    #[tokio::test]
    async fn test_person_detection_raises_alert_once() {
        let stream = test_stream("entrance", "4", StreamStatus::Active);
        let id = stream.id;
        // Two frames, each with a person sighting; the second must be deduped
        let (source, _) = ScriptedSource::finite(vec![test_frame(640, 480); 2]);
        let (worker, h) = worker_with(
            stream.clone(),
            StaticDetector::scripted(vec![
                vec![candidate("person", 0.75)],
                vec![candidate("person", 0.8)],
            ]),
            ScriptedOpener::new(vec![Box::new(source)]),
            test_policy(),
        );
        h.store.insert(stream).await;
        h.store.set_threshold(0.5).await;

        worker.run().await;

        assert_eq!(h.sink.detections().await.len(), 2);

        let alerts = h.sink.alerts().await;
        assert_eq!(alerts.len(), 1, "second sighting within the window is suppressed");
        assert_eq!(alerts[0].stream_id, id);
        assert_eq!(alerts[0].alert_type, "Unauthorized Person");
        assert_eq!(alerts[0].severity, "high");
        assert!(!alerts[0].resolved);
        assert!(alerts[0].description.contains("entrance"));
    }

    #[tokio::test]
    async fn test_low_confidence_person_does_not_alert() {
        let stream = test_stream("hall", "5", StreamStatus::Active);
        let (source, _) = ScriptedSource::finite(vec![test_frame(640, 480)]);
        let (worker, h) = worker_with(
            stream.clone(),
            // Above the detection threshold but below the alert floor
            StaticDetector::always(vec![candidate("person", 0.65)]),
            ScriptedOpener::new(vec![Box::new(source)]),
            test_policy(),
        );
        h.store.insert(stream).await;
        h.store.set_threshold(0.5).await;

        worker.run().await;

        assert_eq!(h.sink.detections().await.len(), 1);
        assert!(h.sink.alerts().await.is_empty());
    }

    #[tokio::test]
    async fn test_detection_cadence_every_nth_frame() {
        let stream = test_stream("parking", "6", StreamStatus::Active);
        let (source, _) = ScriptedSource::finite(vec![test_frame(320, 240); 10]);
        let detector = StaticDetector::always(vec![]);
        let policy = WorkerPolicy {
            control_check_frames: 100,
            detect_every_frames: 5,
            ..WorkerPolicy::default()
        };

        let store = Arc::new(InMemoryStreamStore::new());
        let sink = Arc::new(InMemorySink::new());
        let cache = Arc::new(LiveFrameCache::new());
        let dedup = Arc::new(AlertDeduplicator::new(sink.clone()));
        let detector = Arc::new(detector);

        store.insert(stream.clone()).await;

        let worker = StreamWorker::new(
            stream,
            store,
            sink,
            detector.clone(),
            cache,
            dedup,
            Arc::new(ScriptedOpener::new(vec![Box::new(source)])),
            policy,
        );
        worker.run().await;

        // 10 frames at every-5th cadence: frames 5 and 10
        assert_eq!(detector.calls(), 2);
    }

    #[tokio::test]
    async fn test_threshold_hot_reload_at_control_check() {
        let stream = test_stream("atrium", "7", StreamStatus::Active);
        let id = stream.id;
        let (source, _) = ScriptedSource::endless(vec![test_frame(640, 480)]);
        let (worker, h) = worker_with(
            stream.clone(),
            StaticDetector::always(vec![candidate("bicycle", 0.6)]),
            ScriptedOpener::new(vec![Box::new(source)]),
            test_policy(),
        );
        h.store.insert(stream).await;
        // Initially nothing qualifies
        h.store.set_threshold(0.9).await;

        let store = h.store.clone();
        let sink = h.sink.clone();
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(sink.detections().await.is_empty());

        // Lower the threshold; the next control check must pick it up
        store.set_threshold(0.5).await;
        let observed = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if !sink.detections().await.is_empty() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok();
        assert!(observed, "threshold change must be picked up mid-run");

        store.set_status(id, StreamStatus::Inactive).await.unwrap();
        handle.await.unwrap();
    }
}
