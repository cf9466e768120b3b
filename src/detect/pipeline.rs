use anyhow::{anyhow, Result};

use crate::detect::backend::{FaceLocalizer, MaskClassifier};
use crate::detect::preprocess::FaceBatch;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Default localizer confidence a candidate must exceed.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// Two-stage face/mask detector.
///
/// Runs the localizer once per frame, keeps candidates above the confidence
/// threshold, and scores all survivors in one classifier call.
pub struct DetectionPipeline {
    localizer: Box<dyn FaceLocalizer>,
    classifier: Box<dyn MaskClassifier>,
    min_confidence: f32,
}

impl DetectionPipeline {
    pub fn new(
        localizer: Box<dyn FaceLocalizer>,
        classifier: Box<dyn MaskClassifier>,
        min_confidence: f32,
    ) -> Self {
        Self {
            localizer,
            classifier,
            min_confidence,
        }
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    pub fn backend_names(&self) -> (&'static str, &'static str) {
        (self.localizer.name(), self.classifier.name())
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.localizer.warm_up()
    }

    /// Detect and classify faces. Inference errors are logged and yield no detections.
    pub fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        match self.try_detect(frame) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!("detection failed, frame left unannotated: {:#}", err);
                Vec::new()
            }
        }
    }

    pub fn try_detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self.localizer.localize(frame)?;
        let rgb = frame.to_rgb_image();
        let mut batch = FaceBatch::new(self.classifier.input_size());
        let mut boxes = Vec::new();
        for candidate in candidates {
            if candidate.confidence <= self.min_confidence {
                continue;
            }
            let Some(bbox) = BoundingBox::from_relative(candidate.rel_box, frame.width, frame.height)
            else {
                log::debug!("dropping zero-area face box {:?}", candidate.rel_box);
                continue;
            };
            batch.push_crop(&rgb, &bbox);
            boxes.push(bbox);
        }

        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let scores = self.classifier.classify(&batch)?;
        if scores.len() != boxes.len() {
            return Err(anyhow!(
                "classifier returned {} scores for {} faces",
                scores.len(),
                boxes.len()
            ));
        }

        Ok(boxes
            .into_iter()
            .zip(scores)
            .map(|(bbox, scores)| Detection::new(bbox, scores))
            .collect())
    }
}
