use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::{DynamicImage, Rgb};
use tempfile::tempdir;

use maskwatch::annotate::{MASKED_COLOR, UNMASKED_COLOR};
use maskwatch::detect::{
    ClassifierTap, DetectionPipeline, FaceCandidate, MaskScores, ScriptedClassifier,
    ScriptedLocalizer,
};
use maskwatch::feedback::{self, RecordingSink};
use maskwatch::ingest::{self, FrameSource, MalformedFrame, SourceStats};
use maskwatch::stream::{load_fallback, FrameEncoder, StopSignal, StreamResources};
use maskwatch::{Annotator, ChannelOrder, Frame, FramePrep, FrameStream, ProcessState, StreamState};

const WIDTH: u32 = 200;
const HEIGHT: u32 = 150;

/// Uniform gray frames, optionally finite, counting releases.
struct TrackingSource {
    remaining: Option<u64>,
    captured: u64,
    releases: Arc<AtomicUsize>,
}

impl FrameSource for TrackingSource {
    fn name(&self) -> &'static str {
        "tracking"
    }

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Ok(None);
            }
            *remaining -= 1;
        }
        self.captured += 1;
        gray_frame().map(Some)
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.captured,
            source: "tracking".to_string(),
        }
    }
}

fn gray_frame() -> Result<Frame> {
    let data = vec![120u8; (WIDTH * HEIGHT * 3) as usize];
    Frame::new(data, WIDTH, HEIGHT, ChannelOrder::Bgr)
}

/// What the next `next_frame` call hands back.
enum Capture {
    Good,
    Malformed,
    Empty,
    Dead,
}

/// Replays a fixed capture script, then reports exhaustion.
struct ScriptedSource {
    script: VecDeque<Capture>,
    captured: u64,
    releases: Arc<AtomicUsize>,
}

impl FrameSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.script.pop_front() {
            None => Ok(None),
            Some(Capture::Good) => {
                self.captured += 1;
                gray_frame().map(Some)
            }
            Some(Capture::Malformed) => Err(anyhow!("corrupt jpeg data").context(MalformedFrame)),
            Some(Capture::Empty) => Ok(Some(Frame::empty())),
            Some(Capture::Dead) => Err(anyhow!("connection reset by camera")),
        }
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.captured,
            source: "scripted".to_string(),
        }
    }
}

struct Harness {
    resources: StreamResources,
    recorder: RecordingSink,
    tap: ClassifierTap,
    releases: Arc<AtomicUsize>,
}

fn masked() -> MaskScores {
    MaskScores {
        masked: 0.9,
        unmasked: 0.1,
    }
}

fn unmasked() -> MaskScores {
    MaskScores {
        masked: 0.2,
        unmasked: 0.8,
    }
}

fn two_faces() -> Vec<FaceCandidate> {
    vec![
        FaceCandidate {
            confidence: 0.95,
            rel_box: [0.1, 0.1, 0.4, 0.5],
        },
        FaceCandidate {
            confidence: 0.9,
            rel_box: [0.5, 0.2, 0.9, 0.8],
        },
    ]
}

fn harness(
    candidates: Vec<FaceCandidate>,
    scores: Vec<MaskScores>,
    frame_limit: Option<u64>,
) -> Harness {
    let releases = Arc::new(AtomicUsize::new(0));
    let source = TrackingSource {
        remaining: frame_limit,
        captured: 0,
        releases: Arc::clone(&releases),
    };
    harness_with_source(Box::new(source), releases, candidates, scores)
}

fn scripted_harness(script: Vec<Capture>) -> Harness {
    let releases = Arc::new(AtomicUsize::new(0));
    let source = ScriptedSource {
        script: script.into(),
        captured: 0,
        releases: Arc::clone(&releases),
    };
    harness_with_source(
        Box::new(source),
        releases,
        two_faces(),
        vec![masked(), unmasked()],
    )
}

fn harness_with_source(
    source: Box<dyn FrameSource>,
    releases: Arc<AtomicUsize>,
    candidates: Vec<FaceCandidate>,
    scores: Vec<MaskScores>,
) -> Harness {
    let classifier = ScriptedClassifier::new(scores);
    let tap = classifier.tap();
    let pipeline = DetectionPipeline::new(
        Box::new(ScriptedLocalizer::new(candidates)),
        Box::new(classifier),
        0.5,
    );
    let recorder = RecordingSink::new();
    let fallback = load_fallback(Path::new("/nonexistent/logo.jpeg"));

    let resources = StreamResources {
        source: ingest::shared(source),
        pipeline: Arc::new(Mutex::new(pipeline)),
        sink: feedback::shared(Box::new(recorder.clone())),
        state: Arc::new(ProcessState::new()),
        encoder: Arc::new(FrameEncoder::new(80, fallback)),
        annotator: Annotator::default(),
        prep: FramePrep {
            flip_vertical: false,
            resize_width: None,
        },
        stop: StopSignal::new(),
    };
    Harness {
        resources,
        recorder,
        tap,
        releases,
    }
}

fn jpeg_body(bytes: &[u8]) -> &[u8] {
    let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    assert!(bytes.starts_with(header), "chunk is missing its part header");
    assert!(bytes.ends_with(b"\r\n\r\n"));
    &bytes[header.len()..bytes.len() - 4]
}

#[test]
fn two_faces_one_masked_one_unmasked() -> Result<()> {
    let h = harness(two_faces(), vec![masked(), unmasked()], None);
    let mut stream = FrameStream::new(h.resources.clone());
    assert_eq!(stream.state(), StreamState::Idle);

    let chunk = stream.next_chunk().expect("chunk");
    assert_eq!(stream.state(), StreamState::Emitted);
    assert_eq!(chunk.tally.masked, 1);
    assert_eq!(chunk.tally.unmasked, 1);
    assert_eq!(chunk.alerts, 1);
    assert_eq!(chunk.display, "0101");
    assert!(chunk.live);
    assert_eq!(h.tap.batch_sizes(), vec![2]);
    assert_eq!(h.recorder.alerts(), 1);
    assert_eq!(h.recorder.last_display().as_deref(), Some("0101"));

    let decoded = image::load_from_memory(jpeg_body(&chunk.bytes))?;
    assert_eq!((decoded.width(), decoded.height()), (WIDTH, HEIGHT));

    let rendered = h.resources.state.last_rendered().expect("rendered frame");
    let rgb = rendered.to_rgb8();
    // masked box (20,15)-(80,75), unmasked box (100,30)-(180,120)
    assert_eq!(*rgb.get_pixel(20, 40), MASKED_COLOR);
    assert_eq!(*rgb.get_pixel(100, 60), UNMASKED_COLOR);
    assert_eq!(*rgb.get_pixel(140, 80), Rgb([120, 120, 120]));
    Ok(())
}

#[test]
fn disabled_feed_sends_fallback_and_paused_display() -> Result<()> {
    let h = harness(two_faces(), vec![masked(), unmasked()], None);
    h.resources.state.set_stream_enabled(false);
    let mut stream = FrameStream::new(h.resources.clone());

    let chunk = stream.next_chunk().expect("chunk");
    assert!(!chunk.live);
    assert_eq!(chunk.display, "----");
    assert_eq!(chunk.alerts, 0);
    assert_eq!(chunk.tally.total(), 2);
    assert_eq!(h.recorder.alerts(), 0);

    let rendered = h.resources.state.last_rendered().expect("rendered frame");
    assert!(matches!(*rendered, DynamicImage::ImageLuma8(_)));
    let decoded = image::load_from_memory(jpeg_body(&chunk.bytes))?;
    assert_eq!(
        (decoded.width(), decoded.height()),
        (rendered.width(), rendered.height())
    );

    h.resources.state.set_stream_enabled(true);
    let chunk = stream.next_chunk().expect("chunk");
    assert!(chunk.live);
    assert_eq!(chunk.display, "0101");
    assert_eq!(chunk.alerts, 1);
    Ok(())
}

#[test]
fn alarm_off_suppresses_alerts_but_not_counts() {
    let h = harness(two_faces(), vec![unmasked()], None);
    assert!(!h.resources.state.toggle_alarm());
    let mut stream = FrameStream::new(h.resources.clone());

    let chunk = stream.next_chunk().expect("chunk");
    assert_eq!(chunk.alerts, 0);
    assert_eq!(chunk.display, "0002");
    assert_eq!(h.recorder.alerts(), 0);
}

#[test]
fn every_unmasked_face_alerts_once() {
    let candidates = vec![
        FaceCandidate {
            confidence: 0.9,
            rel_box: [0.0, 0.0, 0.2, 0.2],
        },
        FaceCandidate {
            confidence: 0.9,
            rel_box: [0.3, 0.3, 0.5, 0.5],
        },
        FaceCandidate {
            confidence: 0.9,
            rel_box: [0.6, 0.6, 0.8, 0.8],
        },
    ];
    let h = harness(candidates, vec![unmasked()], None);
    let mut stream = FrameStream::new(h.resources.clone());

    let chunk = stream.next_chunk().expect("chunk");
    assert_eq!(chunk.alerts, 3);
    assert_eq!(chunk.display, "0003");
    assert_eq!(h.recorder.alerts(), 3);
}

#[test]
fn no_faces_means_no_classifier_call() {
    let weak = vec![FaceCandidate {
        confidence: 0.3,
        rel_box: [0.1, 0.1, 0.4, 0.4],
    }];
    let h = harness(weak, vec![masked()], None);
    let mut stream = FrameStream::new(h.resources.clone());

    let chunk = stream.next_chunk().expect("chunk");
    assert_eq!(chunk.tally.total(), 0);
    assert_eq!(chunk.display, "0000");
    assert_eq!(h.tap.calls(), 0);
}

#[test]
fn exhausted_source_stops_and_releases() {
    let h = harness(two_faces(), vec![masked(), unmasked()], Some(2));
    let stream = FrameStream::new(h.resources.clone());

    let chunks: Vec<_> = stream.collect();
    assert_eq!(chunks.len(), 2);
    assert_eq!(h.releases.load(Ordering::SeqCst), 1);

    let mut again = FrameStream::new(h.resources.clone());
    assert!(again.next_chunk().is_none());
    assert_eq!(again.state(), StreamState::Stopped);
}

#[test]
fn stop_signal_ends_stream_and_releases_source() {
    let h = harness(two_faces(), vec![masked(), unmasked()], None);
    let mut stream = FrameStream::new(h.resources.clone());
    assert!(stream.next_chunk().is_some());

    h.resources.stop.trigger();
    assert!(stream.next_chunk().is_none());
    assert_eq!(stream.state(), StreamState::Stopped);
    assert_eq!(h.releases.load(Ordering::SeqCst), 1);
    assert!(stream.next_chunk().is_none());
    assert_eq!(h.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn tally_resets_between_frames() {
    let h = harness(two_faces(), vec![masked(), unmasked()], None);
    let chunks: Vec<_> = FrameStream::new(h.resources.clone()).take(3).collect();
    assert_eq!(chunks.len(), 3);
    for chunk in chunks {
        assert_eq!(chunk.display, "0101");
        assert_eq!(chunk.tally.total(), 2);
    }
    assert_eq!(h.recorder.alerts(), 3);
}

#[test]
fn malformed_and_empty_frames_are_dropped_without_ending_the_stream() -> Result<()> {
    let h = scripted_harness(vec![
        Capture::Good,
        Capture::Malformed,
        Capture::Empty,
        Capture::Good,
        Capture::Malformed,
        Capture::Good,
    ]);
    let mut stream = FrameStream::new(h.resources.clone());

    for _ in 0..3 {
        let chunk = stream.next_chunk().expect("good frame after a bad one");
        assert_eq!(chunk.display, "0101");
        assert_eq!(stream.state(), StreamState::Emitted);
        assert_eq!(h.releases.load(Ordering::SeqCst), 0);

        let rendered = h.resources.state.last_rendered().expect("rendered frame");
        assert_eq!((rendered.width(), rendered.height()), (WIDTH, HEIGHT));
    }
    assert_eq!(h.recorder.alerts(), 3);

    let dir = tempdir()?;
    let snapshot = dir.path().join("snapshot.jpg");
    assert!(h.resources.state.save_snapshot(&snapshot)?);
    assert_eq!(image::open(&snapshot)?.width(), WIDTH);

    assert!(stream.next_chunk().is_none());
    assert_eq!(h.releases.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn empty_frame_never_replaces_the_last_render() {
    let h = scripted_harness(vec![Capture::Good, Capture::Empty]);
    let mut stream = FrameStream::new(h.resources.clone());

    assert!(stream.next_chunk().is_some());
    assert!(stream.next_chunk().is_none());
    let rendered = h.resources.state.last_rendered().expect("rendered frame");
    assert_eq!((rendered.width(), rendered.height()), (WIDTH, HEIGHT));
    assert_eq!(h.tap.calls(), 1);
}

#[test]
fn dead_source_stops_and_releases() {
    let h = scripted_harness(vec![Capture::Good, Capture::Dead, Capture::Good]);
    let mut stream = FrameStream::new(h.resources.clone());

    assert!(stream.next_chunk().is_some());
    assert!(stream.next_chunk().is_none());
    assert_eq!(stream.state(), StreamState::Stopped);
    assert_eq!(h.releases.load(Ordering::SeqCst), 1);
}
