mod backend;
mod backends;
mod pipeline;
mod preprocess;
mod result;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

pub use backend::{FaceLocalizer, MaskClassifier};
pub use backends::{ClassifierTap, ScriptedClassifier, ScriptedLocalizer};
#[cfg(feature = "backend-tract")]
pub use backends::{TractFaceLocalizer, TractMaskClassifier};
pub use pipeline::{DetectionPipeline, DEFAULT_MIN_CONFIDENCE};
pub use preprocess::{
    localizer_blob, FaceBatch, CLASSIFIER_INPUT_SIZE, LOCALIZER_INPUT_SIZE, LOCALIZER_MEAN_BGR,
};
pub use result::{BoundingBox, Detection, FaceCandidate, MaskLabel, MaskScores};

/// Pipeline shared between stream loops.
pub type SharedPipeline = Arc<Mutex<DetectionPipeline>>;

/// Inference backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// ONNX models through tract.
    Tract,
    /// Scripted single-face detector, no model files.
    Stub,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tract" | "onnx" => Ok(Self::Tract),
            "stub" => Ok(Self::Stub),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tract => "tract",
            Self::Stub => "stub",
        })
    }
}

/// Where the two models live and how strict the localizer is.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSettings {
    pub backend: BackendKind,
    pub face_dir: PathBuf,
    pub mask_model: PathBuf,
    pub min_confidence: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Tract,
            face_dir: PathBuf::from("face_detector"),
            mask_model: PathBuf::from("mask_detector.onnx"),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// Load both models and assemble the pipeline.
pub fn build_pipeline(settings: &ModelSettings) -> Result<DetectionPipeline> {
    match settings.backend {
        BackendKind::Stub => {
            log::info!("using scripted stub detector");
            Ok(DetectionPipeline::new(
                Box::new(ScriptedLocalizer::single_face()),
                Box::new(ScriptedClassifier::new(vec![MaskScores {
                    masked: 0.2,
                    unmasked: 0.8,
                }])),
                settings.min_confidence,
            ))
        }
        BackendKind::Tract => build_tract(settings),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &ModelSettings) -> Result<DetectionPipeline> {
    log::info!("loading face detector model from {}", settings.face_dir.display());
    let localizer = TractFaceLocalizer::load(&settings.face_dir)?;
    log::info!("loading face mask detector model {}", settings.mask_model.display());
    let classifier = TractMaskClassifier::load(&settings.mask_model)?;
    Ok(DetectionPipeline::new(
        Box::new(localizer),
        Box::new(classifier),
        settings.min_confidence,
    ))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &ModelSettings) -> Result<DetectionPipeline> {
    Err(anyhow!(
        "tract backend requires the backend-tract feature; rebuild with it or use --backend stub"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ChannelOrder, Frame};

    #[test]
    fn parses_backend_names() -> Result<()> {
        assert_eq!("tract".parse::<BackendKind>()?, BackendKind::Tract);
        assert_eq!(" STUB ".parse::<BackendKind>()?, BackendKind::Stub);
        assert!("opencv".parse::<BackendKind>().is_err());
        Ok(())
    }

    #[test]
    fn stub_pipeline_reports_one_unmasked_face() -> Result<()> {
        let settings = ModelSettings {
            backend: BackendKind::Stub,
            ..ModelSettings::default()
        };
        let mut pipeline = build_pipeline(&settings)?;
        let frame = Frame::new(vec![90u8; 40 * 30 * 3], 40, 30, ChannelOrder::Bgr)?;
        let detections = pipeline.detect(&frame);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, MaskLabel::Unmasked);
        Ok(())
    }
}
