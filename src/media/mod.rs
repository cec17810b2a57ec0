//! Media boundary - decoded-frame providers
//!
//! ## Responsibilities
//!
//! - Decode still images into BGR `Frame`s (via the `image` crate)
//! - Define the `VideoSource` trait the video pipeline consumes
//! - Define the `StreamSource`/`StreamConnector` traits for live ingest
//!
//! Video and live-stream decoding stay outside the core; callers supply an
//! implementation of the traits below. `SyntheticVideoSource` is the
//! deterministic in-memory implementation used by tests and demos.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::{Frame, CHANNELS_BGR};

/// Source-level facts reported before decoding starts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
    pub duration: f64,
}

/// Sequential decoded-frame provider for a finite source.
pub trait VideoSource: Send {
    fn metadata(&self) -> VideoMetadata;

    /// Next decoded frame, `None` at end of stream. Frames carry their
    /// timestamp and source index when the decoder knows them.
    fn read_frame(&mut self) -> Result<Option<Frame>>;
}

/// Live protocol kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Rtsp,
    Rtmp,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Rtsp => "rtsp",
            StreamKind::Rtmp => "rtmp",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rtsp" => Some(Self::Rtsp),
            "rtmp" => Some(Self::Rtmp),
            _ => None,
        }
    }
}

/// Open live connection. Reads block until a frame arrives.
pub trait StreamSource: Send {
    /// Blocking read of the next frame. `ConnectionLost` when the source
    /// drops mid-stream.
    fn read_frame(&mut self) -> Result<Frame>;
}

/// Factory opening live sources; the worker owns reconnect policy.
pub trait StreamConnector: Send + Sync {
    fn connect(&self, url: &str, kind: StreamKind) -> Result<Box<dyn StreamSource>>;
}

/// Connector for deployments without a live-ingest integration: every
/// connect is refused as unavailable.
pub struct UnwiredStreamConnector;

impl StreamConnector for UnwiredStreamConnector {
    fn connect(&self, url: &str, _kind: StreamKind) -> Result<Box<dyn StreamSource>> {
        Err(Error::SourceUnavailable(format!(
            "no stream ingest wired for {url}"
        )))
    }
}

/// Decode an encoded still image (JPEG/PNG/...) into a BGR frame.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<Frame> {
    if bytes.is_empty() {
        return Err(Error::Input("empty image payload".into()));
    }
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| Error::UnsupportedFormat(format!("image decode: {e}")))?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for px in rgb.pixels() {
        data.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    Frame::new(width, height, CHANNELS_BGR, data)
}

/// Decode an image file from disk.
pub fn decode_image_path(path: &Path) -> Result<Frame> {
    if !path.exists() {
        return Err(Error::Input(format!("no such file: {}", path.display())));
    }
    let bytes = std::fs::read(path)?;
    decode_image_bytes(&bytes)
}

/// Deterministic in-memory video source for tests and demos.
pub struct SyntheticVideoSource {
    frames: std::vec::IntoIter<Frame>,
    metadata: VideoMetadata,
    /// Error injected after the remaining frames run out.
    trailing_error: Option<Error>,
}

impl SyntheticVideoSource {
    /// Build from pre-timestamped frames. Metadata is derived from the
    /// frame list and the declared fps.
    pub fn new(frames: Vec<Frame>, fps: f64) -> Self {
        let (width, height) = frames
            .first()
            .map(|f| (f.width(), f.height()))
            .unwrap_or((0, 0));
        let frame_count = frames.len() as u64;
        let duration = if fps > 0.0 {
            frame_count as f64 / fps
        } else {
            0.0
        };
        Self {
            frames: frames.into_iter(),
            metadata: VideoMetadata {
                width,
                height,
                fps,
                frame_count,
                duration,
            },
            trailing_error: None,
        }
    }

    /// Make the source fail mid-stream once the frames run out, to model a
    /// decoder error.
    pub fn with_trailing_error(mut self, error: Error) -> Self {
        self.trailing_error = Some(error);
        self
    }
}

impl VideoSource for SyntheticVideoSource {
    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        match self.frames.next() {
            Some(frame) => Ok(Some(frame)),
            None => match self.trailing_error.take() {
                Some(e) => Err(e),
                None => Ok(None),
            },
        }
    }
}
