//! FrameSource - Video Ingest Abstraction
//!
//! ## Responsibilities
//!
//! - Open a stream's raw input from its source locator
//! - Try alternate backend strategies in fixed priority order at open time
//! - Yield frames, signal end-of-stream/failure
//!
//! Frames are pulled from a long-running ffmpeg child process emitting an
//! MJPEG pipe. The child is spawned with `kill_on_drop(true)` so an abandoned
//! source never leaves a zombie ffmpeg behind.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::Cursor;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

/// JPEG start-of-image marker
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// One decoded-enough frame: encoded bytes plus source dimensions
#[derive(Debug, Clone)]
pub struct Frame {
    /// JPEG bytes, ready for the live cache and the detector
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

/// Frame source boundary
#[async_trait]
pub trait FrameSource: Send {
    /// Pull the next frame. An error is terminal for the stream
    /// (end-of-stream, read timeout, or pipe failure).
    async fn read_frame(&mut self) -> Result<Frame>;

    /// Release the underlying capture handle
    async fn close(&mut self);
}

/// Parsed source locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// Local V4L2 device index ("0" -> /dev/video0)
    Device(u32),
    /// Network URI (rtsp://, http://, file path, ...)
    Uri(String),
}

impl SourceLocator {
    /// An all-digits locator is a device index, anything else a URI
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<u32>() {
            Ok(index) => SourceLocator::Device(index),
            Err(_) => SourceLocator::Uri(trimmed.to_string()),
        }
    }
}

/// Capture backend strategy, tried in priority order at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureBackend {
    RtspTcp,
    RtspUdp,
    PlainUri,
    V4l2Mjpeg,
    V4l2Default,
}

impl CaptureBackend {
    /// String form for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureBackend::RtspTcp => "rtsp-tcp",
            CaptureBackend::RtspUdp => "rtsp-udp",
            CaptureBackend::PlainUri => "plain",
            CaptureBackend::V4l2Mjpeg => "v4l2-mjpeg",
            CaptureBackend::V4l2Default => "v4l2",
        }
    }
}

/// Backend candidates for a locator, in the order they are attempted
pub fn backend_candidates(locator: &SourceLocator) -> Vec<CaptureBackend> {
    match locator {
        SourceLocator::Device(_) => vec![CaptureBackend::V4l2Mjpeg, CaptureBackend::V4l2Default],
        SourceLocator::Uri(uri) if uri.starts_with("rtsp://") => vec![
            CaptureBackend::RtspTcp,
            CaptureBackend::RtspUdp,
            CaptureBackend::PlainUri,
        ],
        SourceLocator::Uri(_) => vec![CaptureBackend::PlainUri],
    }
}

/// Frame source tunables
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Time allowed for a backend to produce its first frame
    pub open_timeout: Duration,
    /// Bound on a single frame read; keeps the worker's control check
    /// reachable even when a camera stalls mid-stream
    pub read_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// Source-opening seam; workers go through this so ingestion can be faked
/// without a camera on the bench
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(
        &self,
        stream_id: &str,
        locator: &str,
        config: &SourceConfig,
    ) -> Result<Box<dyn FrameSource>>;
}

/// Production opener backed by ffmpeg child processes
pub struct FfmpegOpener;

#[async_trait]
impl SourceOpener for FfmpegOpener {
    async fn open(
        &self,
        stream_id: &str,
        locator: &str,
        config: &SourceConfig,
    ) -> Result<Box<dyn FrameSource>> {
        open_source(stream_id, locator, config).await
    }
}

/// Open a frame source, trying each backend candidate until one yields a
/// frame within the open timeout
pub async fn open_source(
    stream_id: &str,
    raw_locator: &str,
    config: &SourceConfig,
) -> Result<Box<dyn FrameSource>> {
    let locator = SourceLocator::parse(raw_locator);
    let candidates = backend_candidates(&locator);
    let mut last_error = String::from("no backend candidates");

    for backend in candidates {
        tracing::debug!(
            stream_id = %stream_id,
            backend = backend.as_str(),
            locator = %raw_locator,
            "Trying capture backend"
        );

        match FfmpegSource::open(&locator, backend, config).await {
            Ok(source) => {
                tracing::info!(
                    stream_id = %stream_id,
                    backend = backend.as_str(),
                    "Capture backend committed"
                );
                return Ok(Box::new(source));
            }
            Err(e) => {
                tracing::warn!(
                    stream_id = %stream_id,
                    backend = backend.as_str(),
                    error = %e,
                    "Capture backend failed, trying next"
                );
                last_error = e.to_string();
            }
        }
    }

    Err(Error::SourceOpen {
        stream_id: stream_id.to_string(),
        message: last_error,
    })
}

/// ffmpeg-backed frame source
pub struct FfmpegSource {
    child: Child,
    stdout: BufReader<ChildStdout>,
    /// Carry-over bytes between reads; may hold partial or whole frames
    buf: Vec<u8>,
    /// First frame captured during open, handed out on the first read
    pending: Option<Frame>,
    read_timeout: Duration,
}

impl FfmpegSource {
    /// Spawn ffmpeg for one backend and wait for the first frame
    async fn open(
        locator: &SourceLocator,
        backend: CaptureBackend,
        config: &SourceConfig,
    ) -> Result<Self> {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner").args(["-loglevel", "error"]);

        match backend {
            CaptureBackend::RtspTcp => {
                cmd.args(["-rtsp_transport", "tcp"])
                    .args(["-fflags", "nobuffer"])
                    .args(["-flags", "low_delay"]);
            }
            CaptureBackend::RtspUdp => {
                cmd.args(["-rtsp_transport", "udp"])
                    .args(["-fflags", "nobuffer"])
                    .args(["-flags", "low_delay"]);
            }
            CaptureBackend::PlainUri => {}
            CaptureBackend::V4l2Mjpeg => {
                cmd.args(["-f", "video4linux2"]).args(["-input_format", "mjpeg"]);
            }
            CaptureBackend::V4l2Default => {
                cmd.args(["-f", "video4linux2"]);
            }
        }

        let input = match locator {
            SourceLocator::Device(index) => format!("/dev/video{}", index),
            SourceLocator::Uri(uri) => uri.clone(),
        };

        // -an: drop audio, we only consume video
        cmd.arg("-i")
            .arg(&input)
            .arg("-an")
            .args(["-f", "image2pipe"])
            .args(["-vcodec", "mjpeg"])
            .args(["-q:v", "5"])
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Internal(format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("failed to capture ffmpeg stdout".to_string()))?;

        let mut source = Self {
            child,
            stdout: BufReader::new(stdout),
            buf: Vec::with_capacity(64 * 1024),
            pending: None,
            read_timeout: config.read_timeout,
        };

        // The backend is committed only once it proves it can deliver a frame
        let first = match tokio::time::timeout(config.open_timeout, source.next_frame()).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                source.close().await;
                return Err(e);
            }
            Err(_) => {
                source.close().await;
                return Err(Error::SourceRead(format!(
                    "no frame within open timeout ({:?})",
                    config.open_timeout
                )));
            }
        };

        source.pending = Some(first);
        Ok(source)
    }

    /// Read from the pipe until a complete JPEG frame is available
    async fn next_frame(&mut self) -> Result<Frame> {
        let mut chunk = [0u8; 16 * 1024];

        loop {
            if let Some(data) = extract_jpeg(&mut self.buf) {
                let (width, height) = probe_dimensions(&data)?;
                return Ok(Frame {
                    data,
                    width,
                    height,
                    captured_at: Utc::now(),
                });
            }

            let n = self.stdout.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::SourceRead("end of stream".to_string()));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn read_frame(&mut self) -> Result<Frame> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }

        match tokio::time::timeout(self.read_timeout, self.next_frame()).await {
            Ok(result) => result,
            Err(_) => Err(Error::SourceRead(format!(
                "frame read timeout ({:?})",
                self.read_timeout
            ))),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "ffmpeg child already gone on close");
        }
    }
}

/// Extract one complete JPEG (SOI..EOI) from the front of `buf`, draining the
/// consumed bytes. Returns None when no complete frame is buffered yet.
fn extract_jpeg(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let start = find_marker(buf, &JPEG_SOI, 0)?;
    let end = find_marker(buf, &JPEG_EOI, start + 2)?;

    let frame = buf[start..end + 2].to_vec();
    buf.drain(..end + 2);
    Some(frame)
}

/// Find a two-byte marker at or after `from`
fn find_marker(buf: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    if buf.len() < from + 2 {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| from + pos)
}

/// Header-only dimension probe of an encoded frame
fn probe_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| Error::SourceRead(format!("frame format probe failed: {}", e)))?
        .into_dimensions()
        .map_err(|e| Error::SourceRead(format!("frame dimension probe failed: {}", e)))
}
