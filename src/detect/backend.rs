use anyhow::Result;

use crate::detect::preprocess::FaceBatch;
use crate::detect::result::{FaceCandidate, MaskScores};
use crate::frame::Frame;

/// First inference stage: find faces in a frame.
///
/// Implementations run once per frame and report every candidate they see,
/// weak ones included. Thresholding happens in the pipeline.
pub trait FaceLocalizer: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Propose face regions in relative coordinates.
    fn localize(&mut self, frame: &Frame) -> Result<Vec<FaceCandidate>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Second inference stage: score a batch of normalized face crops.
///
/// The returned vector is index-aligned with the batch.
pub trait MaskClassifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Side length of the square input the classifier expects.
    fn input_size(&self) -> u32 {
        crate::detect::preprocess::CLASSIFIER_INPUT_SIZE
    }

    fn classify(&mut self, batch: &FaceBatch) -> Result<Vec<MaskScores>>;
}
