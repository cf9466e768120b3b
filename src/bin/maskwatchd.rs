//! maskwatchd - face mask monitor daemon
//!
//! Loads the face detector and mask classifier, opens the camera, and serves
//! the annotated MJPEG feed plus the control routes over HTTP. Unmasked faces
//! trigger the buzzer while the alarm is armed.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};

use anyhow::{anyhow, Result};
use clap::Parser;

use maskwatch::{
    api::ApiServer,
    build_pipeline,
    config::{ConfigOverrides, MaskwatchConfig},
    feedback, ingest,
    stream::{load_fallback, FrameEncoder, StopSignal, StreamResources},
    Annotator, ProcessState,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Face mask detection with MJPEG streaming")]
struct Args {
    /// Directory holding the face detector model (face_detector.onnx).
    #[arg(short = 'f', long = "face", value_name = "DIR")]
    face: Option<PathBuf>,

    /// Trained mask classifier model.
    #[arg(short = 'm', long = "model", value_name = "FILE")]
    model: Option<PathBuf>,

    /// Minimum localizer confidence to keep a face.
    #[arg(short = 'c', long = "confidence", value_name = "0..1")]
    confidence: Option<f32>,

    /// JSON config file.
    #[arg(long, env = "MASKWATCH_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Frame source: /dev/videoN, http(s) MJPEG url, image path, or stub://name.
    #[arg(long)]
    source: Option<String>,

    /// HTTP listen address.
    #[arg(long)]
    addr: Option<String>,

    /// Detector backend: tract or stub.
    #[arg(long)]
    backend: Option<String>,

    /// Feedback sink: log, noop, or rainbowhat.
    #[arg(long)]
    feedback: Option<String>,

    /// Flip frames vertically (camera mounted upside down).
    #[arg(long)]
    flip: bool,

    /// Stop when `q` is entered on stdin.
    #[arg(long)]
    quit_on_q: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = MaskwatchConfig::load_from(args.config.as_deref())?;
    config.apply_overrides(&ConfigOverrides {
        face_dir: args.face,
        mask_model: args.model,
        min_confidence: args.confidence,
        source: args.source,
        addr: args.addr,
        backend: args.backend,
        feedback: args.feedback,
        flip_vertical: args.flip,
    })?;

    let mut pipeline = build_pipeline(&config.models)?;
    let (localizer, classifier) = pipeline.backend_names();
    log::info!(
        "detector ready: localizer={}, classifier={}, min_confidence={}",
        localizer,
        classifier,
        pipeline.min_confidence()
    );
    if let Err(err) = pipeline.warm_up() {
        log::warn!("detector warm-up failed: {:#}", err);
    }

    log::info!("starting video stream from {}", config.source.uri);
    let mut source = ingest::open_source(&config.source)?;
    source.connect()?;
    let source = ingest::shared(source);

    let sink = feedback::shared(feedback::open_sink(&config.feedback));
    let fallback = load_fallback(&config.stream.fallback_image);
    let stop = StopSignal::new();

    let resources = StreamResources {
        source: source.clone(),
        pipeline: Arc::new(Mutex::new(pipeline)),
        sink,
        state: Arc::new(ProcessState::new()),
        encoder: Arc::new(FrameEncoder::new(config.stream.jpeg_quality, fallback)),
        annotator: Annotator::from_font_path(config.stream.label_font.as_deref()),
        prep: config.stream.frame_prep(),
        stop: stop.clone(),
    };

    let api_handle = ApiServer::new(config.api.clone(), resources).spawn()?;
    log::info!("maskwatchd listening on http://{}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    if args.quit_on_q {
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) if line.trim() == "q" => {
                        let _ = tx.send(());
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    }

    log::info!(
        "maskwatchd waiting for shutdown signal (Ctrl-C{})...",
        if args.quit_on_q { " or q" } else { "" }
    );
    rx.recv()
        .map_err(|_| anyhow!("shutdown channel closed unexpectedly"))?;
    log::info!("shutdown signal received, stopping...");
    stop.trigger();
    api_handle.stop()?;
    source
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .release();
    log::info!("maskwatchd stopped");
    Ok(())
}
