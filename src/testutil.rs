//! In-memory fakes for the external-collaborator boundaries, test builds only

use crate::detection_log::{Alert, Detection, DetectionSink};
use crate::detector::{DetectionCandidate, Detector};
use crate::error::{Error, Result};
use crate::frame_source::{Frame, FrameSource, SourceConfig, SourceOpener};
use crate::stream_store::{DetectionSettings, Stream, StreamStatus, StreamStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// A synthetic frame; dimensions are carried explicitly so no decoding happens
pub fn test_frame(width: u32, height: u32) -> Frame {
    Frame {
        data: vec![0xFF, 0xD8, 0x00, 0x01, 0x02, 0xFF, 0xD9],
        width,
        height,
        captured_at: Utc::now(),
    }
}

pub fn test_stream(name: &str, source: &str, status: StreamStatus) -> Stream {
    Stream {
        id: Uuid::new_v4(),
        name: name.to_string(),
        source: source.to_string(),
        status: status.as_str().to_string(),
        created_at: Utc::now(),
    }
}

// ========================================
// StreamStore fake
// ========================================

pub struct InMemoryStreamStore {
    streams: RwLock<HashMap<Uuid, Stream>>,
    settings: RwLock<DetectionSettings>,
    fail_reads: AtomicBool,
}

impl InMemoryStreamStore {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            settings: RwLock::new(DetectionSettings::default()),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub async fn insert(&self, stream: Stream) {
        self.streams.write().await.insert(stream.id, stream);
    }

    pub async fn set_threshold(&self, threshold: f32) {
        self.settings.write().await.threshold = threshold;
    }

    /// Make every read fail until cleared, for fail-open tests
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub async fn status_of(&self, id: Uuid) -> Option<StreamStatus> {
        self.streams.read().await.get(&id).map(|s| s.status())
    }

    fn check_fail(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Internal("simulated store failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamStore for InMemoryStreamStore {
    async fn list_streams(&self) -> Result<Vec<Stream>> {
        self.check_fail()?;
        Ok(self.streams.read().await.values().cloned().collect())
    }

    async fn list_active(&self) -> Result<Vec<Stream>> {
        self.check_fail()?;
        Ok(self
            .streams
            .read()
            .await
            .values()
            .filter(|s| s.status() == StreamStatus::Active)
            .cloned()
            .collect())
    }

    async fn get_stream(&self, id: Uuid) -> Result<Option<Stream>> {
        self.check_fail()?;
        Ok(self.streams.read().await.get(&id).cloned())
    }

    async fn set_status(&self, id: Uuid, status: StreamStatus) -> Result<()> {
        let mut streams = self.streams.write().await;
        if let Some(stream) = streams.get_mut(&id) {
            stream.status = status.as_str().to_string();
        }
        Ok(())
    }

    async fn get_detection_settings(&self) -> Result<DetectionSettings> {
        self.check_fail()?;
        Ok(*self.settings.read().await)
    }
}

// ========================================
// DetectionSink fake
// ========================================

pub struct InMemorySink {
    detections: Mutex<Vec<Detection>>,
    alerts: Mutex<Vec<Alert>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self {
            detections: Mutex::new(Vec::new()),
            alerts: Mutex::new(Vec::new()),
        }
    }

    /// Seed an alert as if written by a previous process run
    pub fn preload_alert(&self, alert: Alert) {
        self.alerts
            .try_lock()
            .expect("sink not contended during test setup")
            .push(alert);
    }

    pub async fn detections(&self) -> Vec<Detection> {
        self.detections.lock().await.clone()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl DetectionSink for InMemorySink {
    async fn insert_detection(&self, detection: &Detection) -> Result<()> {
        self.detections.lock().await.push(detection.clone());
        Ok(())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }

    async fn recent_alert(
        &self,
        stream_id: Uuid,
        alert_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        Ok(self
            .alerts
            .lock()
            .await
            .iter()
            .filter(|a| {
                a.stream_id == stream_id && a.alert_type == alert_type && a.created_at >= since
            })
            .max_by_key(|a| a.created_at)
            .cloned())
    }
}

// ========================================
// Detector fake
// ========================================

pub struct StaticDetector {
    /// Per-call scripted results; when exhausted, returns `fallback`
    scripted: Mutex<VecDeque<Vec<DetectionCandidate>>>,
    fallback: Vec<DetectionCandidate>,
    calls: AtomicUsize,
}

impl StaticDetector {
    /// Detector returning the same candidates on every call
    pub fn always(candidates: Vec<DetectionCandidate>) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            fallback: candidates,
            calls: AtomicUsize::new(0),
        }
    }

    /// Detector returning scripted per-call results, then nothing
    pub fn scripted(results: Vec<Vec<DetectionCandidate>>) -> Self {
        Self {
            scripted: Mutex::new(results.into()),
            fallback: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for StaticDetector {
    async fn detect(&self, _frame: &[u8]) -> Result<Vec<DetectionCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scripted = self.scripted.lock().await;
        Ok(scripted.pop_front().unwrap_or_else(|| self.fallback.clone()))
    }
}

// ========================================
// FrameSource / SourceOpener fakes
// ========================================

pub struct ScriptedSource {
    frames: VecDeque<Frame>,
    /// When the queue runs dry: keep yielding this frame, or end the stream
    repeat: Option<Frame>,
    closed: Arc<AtomicBool>,
}

impl ScriptedSource {
    /// Yields the given frames, then signals end-of-stream
    pub fn finite(frames: Vec<Frame>) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                frames: frames.into(),
                repeat: None,
                closed: closed.clone(),
            },
            closed,
        )
    }

    /// Yields the given frames, then repeats the last one forever
    pub fn endless(frames: Vec<Frame>) -> (Self, Arc<AtomicBool>) {
        let repeat = frames.last().cloned();
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                frames: frames.into(),
                repeat,
                closed: closed.clone(),
            },
            closed,
        )
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn read_frame(&mut self) -> Result<Frame> {
        if let Some(frame) = self.frames.pop_front() {
            return Ok(frame);
        }
        match &self.repeat {
            Some(frame) => Ok(frame.clone()),
            None => Err(Error::SourceRead("end of stream".to_string())),
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Opener handing out pre-built sources, or failing when the script is empty
pub struct ScriptedOpener {
    sources: Mutex<VecDeque<Box<dyn FrameSource>>>,
    opens: AtomicUsize,
}

impl ScriptedOpener {
    pub fn new(sources: Vec<Box<dyn FrameSource>>) -> Self {
        Self {
            sources: Mutex::new(sources.into_iter().collect()),
            opens: AtomicUsize::new(0),
        }
    }

    /// Opener whose every open attempt fails, for connect-failure tests
    pub fn failing() -> Self {
        Self::new(Vec::new())
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceOpener for ScriptedOpener {
    async fn open(
        &self,
        stream_id: &str,
        _locator: &str,
        _config: &SourceConfig,
    ) -> Result<Box<dyn FrameSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().await.pop_front().ok_or_else(|| Error::SourceOpen {
            stream_id: stream_id.to_string(),
            message: "no scripted source available".to_string(),
        })
    }
}
