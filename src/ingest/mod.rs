//! Frame sources.
//!
//! - `stub://` synthetic frames (tests, demos)
//! - Local still image, repeated every frame
//! - USB/V4L2 webcams (feature: ingest-v4l2)
//! - HTTP MJPEG cameras (feature: ingest-mjpeg)
//!
//! A source is opened once at startup and shared by every stream loop. It
//! hands out whole frames and never buffers more than one.

pub mod file;
#[cfg(feature = "ingest-mjpeg")]
pub mod mjpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub use file::StillImageSource;
#[cfg(feature = "ingest-mjpeg")]
pub use mjpeg::MjpegSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Produces frames for the stream loop.
pub trait FrameSource: Send {
    fn name(&self) -> &'static str;

    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `None` once the source is exhausted.
    ///
    /// A frame that arrived but could not be decoded is reported with a
    /// `MalformedFrame` context; the source stays usable for the next read.
    /// Any other error means the transport is gone.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Give the device back. Later reads may reconnect or fail.
    fn release(&mut self) {}

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Context attached to per-frame decode failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MalformedFrame;

impl fmt::Display for MalformedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("malformed frame")
    }
}

/// Whether a `next_frame` error only spoiled one frame.
pub fn is_malformed(err: &anyhow::Error) -> bool {
    err.downcast_ref::<MalformedFrame>().is_some()
}

pub type SharedSource = Arc<Mutex<Box<dyn FrameSource>>>;

pub fn shared(source: Box<dyn FrameSource>) -> SharedSource {
    Arc::new(Mutex::new(source))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Where frames come from and how they are requested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceConfig {
    /// `stub://…`, `http(s)://…`, `/dev/videoN`, or a local image path.
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Stop after this many frames. Only honoured by finite-capable sources.
    pub max_frames: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            target_fps: 10,
            max_frames: None,
        }
    }
}

/// Pick a source implementation from the URI.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    let uri = config.uri.trim();
    if uri.is_empty() {
        return Err(anyhow!("frame source is empty"));
    }
    if uri.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())));
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return open_mjpeg(config);
    }
    if uri.starts_with("/dev/video") {
        return open_v4l2(config);
    }
    if uri.contains("://") {
        return Err(anyhow!("unsupported frame source scheme: {}", uri));
    }
    Ok(Box::new(StillImageSource::new(config.clone())))
}

#[cfg(feature = "ingest-mjpeg")]
fn open_mjpeg(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(MjpegSource::new(config.clone())?))
}

#[cfg(not(feature = "ingest-mjpeg"))]
fn open_mjpeg(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "{} needs the ingest-mjpeg feature",
        config.uri
    ))
}

#[cfg(feature = "ingest-v4l2")]
fn open_v4l2(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(V4l2Source::new(config.clone())))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_v4l2(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "{} needs the ingest-v4l2 feature",
        config.uri
    ))
}

/// How long a live source may go without a frame before it counts as unhealthy.
pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}
