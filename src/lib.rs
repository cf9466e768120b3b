//! maskwatch
//!
//! Webcam face-mask monitor. Frames are captured, faces are localized and
//! classified as masked or unmasked, the frame is annotated, and the result is
//! served as an MJPEG stream. Unmasked faces sound a buzzer and the per-frame
//! counts are shown on a four-character display.
//!
//! # Module Structure
//!
//! - `frame`: pixel container and capture-time preparation
//! - `ingest`: frame sources (synthetic, still image, V4L2, HTTP MJPEG)
//! - `detect`: two-stage localizer/classifier pipeline and its backends
//! - `annotate`: boxes, labels, and the per-frame tally
//! - `feedback`: buzzer and display sinks
//! - `state`: shared control flags and the last rendered frame
//! - `stream`: per-subscriber capture/detect/encode loop
//! - `api`: HTTP server, control routes, and the video feed
//! - `config`: file, environment, and command-line configuration

pub mod annotate;
pub mod api;
pub mod config;
pub mod detect;
pub mod feedback;
pub mod frame;
pub mod ingest;
pub mod state;
pub mod stream;

pub use annotate::{Annotator, FrameTally};
pub use config::{ConfigOverrides, MaskwatchConfig};
pub use detect::{
    build_pipeline, BackendKind, BoundingBox, Detection, DetectionPipeline, MaskLabel, MaskScores,
    ModelSettings,
};
pub use feedback::{FeedbackSink, SharedSink};
pub use frame::{ChannelOrder, Frame, FramePrep};
pub use ingest::{open_source, FrameSource, MalformedFrame, SharedSource, SourceConfig};
pub use state::ProcessState;
pub use stream::{FrameEncoder, FrameStream, StopSignal, StreamChunk, StreamResources, StreamState};
