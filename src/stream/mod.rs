//! Per-subscriber streaming loop.
//!
//! Each `/video_feed` connection drives its own `FrameStream`. One `next_chunk`
//! call runs a full capture, detect, annotate, encode cycle and returns a
//! multipart part. Nothing overlaps between frames of one stream.

mod encode;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use image::DynamicImage;

use crate::annotate::{Annotator, FrameTally, PAUSED_DISPLAY};
use crate::detect::{MaskLabel, SharedPipeline};
use crate::feedback::SharedSink;
use crate::frame::FramePrep;
use crate::ingest::{self, SharedSource};
use crate::state::ProcessState;

pub use encode::{load_fallback, FrameEncoder, BOUNDARY, CONTENT_TYPE, DEFAULT_JPEG_QUALITY};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    AwaitingFrame,
    Detecting,
    Annotating,
    Encoding,
    Emitted,
    Stopped,
}

/// Process-wide interrupt. Once triggered every stream ends at its next step.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a stream loop touches. Cheap to clone per subscriber.
#[derive(Clone)]
pub struct StreamResources {
    pub source: SharedSource,
    pub pipeline: SharedPipeline,
    pub sink: SharedSink,
    pub state: Arc<ProcessState>,
    pub encoder: Arc<FrameEncoder>,
    pub annotator: Annotator,
    pub prep: FramePrep,
    pub stop: StopSignal,
}

/// One emitted multipart part plus what went into it.
#[derive(Clone, Debug)]
pub struct StreamChunk {
    pub bytes: Vec<u8>,
    pub tally: FrameTally,
    pub alerts: u32,
    pub display: String,
    /// `false` when the fallback image was sent instead of the camera frame.
    pub live: bool,
}

pub struct FrameStream {
    resources: StreamResources,
    state: StreamState,
}

impl FrameStream {
    pub fn new(resources: StreamResources) -> Self {
        Self {
            resources,
            state: StreamState::Idle,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Run iterations until one emits a chunk. `None` once stopped.
    pub fn next_chunk(&mut self) -> Option<StreamChunk> {
        loop {
            if self.state == StreamState::Stopped {
                return None;
            }
            if self.resources.stop.is_triggered() {
                log::info!("stream interrupted");
                self.stop();
                return None;
            }
            if let Some(chunk) = self.step() {
                return Some(chunk);
            }
        }
    }

    /// One cycle. Returns `None` when the frame was dropped or the stream stopped.
    ///
    /// Malformed and empty frames are dropped and the source is kept. Only
    /// exhaustion or a dead source stops the stream from here.
    fn step(&mut self) -> Option<StreamChunk> {
        self.state = StreamState::AwaitingFrame;
        let captured = {
            let mut source = self
                .resources
                .source
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            source.next_frame()
        };
        let frame = match captured {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("frame source exhausted");
                self.stop();
                return None;
            }
            Err(err) if ingest::is_malformed(&err) => {
                log::debug!("dropping frame: {:#}", err);
                return None;
            }
            Err(err) => {
                log::warn!("frame read failed: {:#}", err);
                self.stop();
                return None;
            }
        };
        if frame.is_empty() {
            log::debug!("dropping empty frame");
            return None;
        }

        self.state = StreamState::Detecting;
        let frame = frame.prepare(&self.resources.prep);
        let detections = self
            .resources
            .pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detect(&frame);

        self.state = StreamState::Annotating;
        let mut rendered = frame.to_rgb_image();
        drop(frame);
        let mut tally = FrameTally::default();
        let mut alerts = 0u32;
        for detection in &detections {
            tally.record(detection.label);
            if detection.label == MaskLabel::Unmasked && self.resources.state.should_alert() {
                alerts += 1;
                self.with_sink(|sink| sink.alert());
            }
            self.resources.annotator.draw(&mut rendered, detection);
        }

        let live = self.resources.state.stream_enabled();
        let (outgoing, display) = if live {
            (Arc::new(DynamicImage::ImageRgb8(rendered)), tally.display_code())
        } else {
            (self.resources.encoder.fallback(), PAUSED_DISPLAY.to_string())
        };
        self.with_sink(|sink| sink.show(&display));

        self.state = StreamState::Encoding;
        let bytes = match self.resources.encoder.multipart_chunk(&outgoing) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("frame encode failed, skipping: {:#}", err);
                return None;
            }
        };
        self.resources.state.store_rendered(outgoing);

        self.state = StreamState::Emitted;
        Some(StreamChunk {
            bytes,
            tally,
            alerts,
            display,
            live,
        })
    }

    fn with_sink<F>(&self, f: F)
    where
        F: FnOnce(&mut dyn crate::feedback::FeedbackSink) -> anyhow::Result<()>,
    {
        let mut sink = self
            .resources
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = f(sink.as_mut()) {
            log::debug!("feedback sink {} failed: {:#}", sink.name(), err);
        }
    }

    fn stop(&mut self) {
        self.state = StreamState::Stopped;
        self.resources
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release();
    }
}

impl Iterator for FrameStream {
    type Item = StreamChunk;

    fn next(&mut self) -> Option<StreamChunk> {
        self.next_chunk()
    }
}
