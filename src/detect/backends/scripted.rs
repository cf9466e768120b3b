use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::backend::{FaceLocalizer, MaskClassifier};
use crate::detect::preprocess::FaceBatch;
use crate::detect::result::{FaceCandidate, MaskScores};
use crate::frame::Frame;

/// Localizer that reports the same candidates for every frame.
///
/// Backs the `stub` detector and the test suites.
pub struct ScriptedLocalizer {
    candidates: Vec<FaceCandidate>,
}

impl ScriptedLocalizer {
    pub fn new(candidates: Vec<FaceCandidate>) -> Self {
        Self { candidates }
    }

    /// One centered face, strong enough to pass the default threshold.
    pub fn single_face() -> Self {
        Self::new(vec![FaceCandidate {
            confidence: 0.9,
            rel_box: [0.3, 0.2, 0.7, 0.8],
        }])
    }
}

impl FaceLocalizer for ScriptedLocalizer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn localize(&mut self, _frame: &Frame) -> Result<Vec<FaceCandidate>> {
        Ok(self.candidates.clone())
    }
}

/// Batch sizes seen by a [`ScriptedClassifier`], shared with the caller.
#[derive(Clone, Default)]
pub struct ClassifierTap {
    batches: Arc<Mutex<Vec<usize>>>,
}

impl ClassifierTap {
    pub fn calls(&self) -> usize {
        self.batches.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    fn record(&self, size: usize) {
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(size);
        }
    }
}

/// Classifier that hands out scripted scores by face index, cycling when the
/// batch is longer than the script.
pub struct ScriptedClassifier {
    scores: Vec<MaskScores>,
    fixed_len: Option<usize>,
    tap: ClassifierTap,
}

impl ScriptedClassifier {
    pub fn new(scores: Vec<MaskScores>) -> Self {
        Self {
            scores,
            fixed_len: None,
            tap: ClassifierTap::default(),
        }
    }

    /// Always return `len` results, whatever the batch size.
    pub fn fixed_len(scores: Vec<MaskScores>, len: usize) -> Self {
        Self {
            fixed_len: Some(len),
            ..Self::new(scores)
        }
    }

    pub fn tap(&self) -> ClassifierTap {
        self.tap.clone()
    }
}

impl MaskClassifier for ScriptedClassifier {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn classify(&mut self, batch: &FaceBatch) -> Result<Vec<MaskScores>> {
        self.tap.record(batch.len());
        if self.scores.is_empty() {
            return Err(anyhow!("scripted classifier has no scores"));
        }
        let len = self.fixed_len.unwrap_or(batch.len());
        Ok((0..len)
            .map(|i| self.scores[i % self.scores.len()])
            .collect())
    }
}
