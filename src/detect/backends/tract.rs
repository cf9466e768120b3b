#![cfg(feature = "backend-tract")]

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{FaceLocalizer, MaskClassifier};
use crate::detect::preprocess::{
    localizer_blob, FaceBatch, CLASSIFIER_INPUT_SIZE, LOCALIZER_INPUT_SIZE,
};
use crate::detect::result::{FaceCandidate, MaskScores};
use crate::frame::Frame;

/// File expected inside the face detector directory.
pub const FACE_MODEL_FILE: &str = "face_detector.onnx";
/// Largest batch handed to the classifier in one inference call.
pub const MAX_CLASSIFIER_BATCH: usize = 32;

type Plan = TypedSimplePlan<TypedModel>;

/// SSD face localizer loaded from an ONNX export of the res10 detector.
///
/// Output rows are `[image_id, label, confidence, x1, y1, x2, y2]`.
pub struct TractFaceLocalizer {
    plan: Plan,
    size: u32,
}

impl TractFaceLocalizer {
    /// Load `face_detector.onnx` from `model_dir`.
    pub fn load<P: AsRef<Path>>(model_dir: P) -> Result<Self> {
        let path = model_dir.as_ref().join(FACE_MODEL_FILE);
        let size = LOCALIZER_INPUT_SIZE as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(&path)
            .with_context(|| format!("failed to load face detector from {}", path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set face detector input fact")?
            .into_optimized()
            .context("failed to optimize face detector")?
            .into_runnable()
            .context("failed to build runnable face detector")?;
        Ok(Self {
            plan,
            size: LOCALIZER_INPUT_SIZE,
        })
    }
}

impl FaceLocalizer for TractFaceLocalizer {
    fn name(&self) -> &'static str {
        "tract-ssd"
    }

    fn localize(&mut self, frame: &Frame) -> Result<Vec<FaceCandidate>> {
        let size = self.size as usize;
        let blob = localizer_blob(frame, self.size);
        let input = tract_ndarray::Array4::from_shape_vec((1, 3, size, size), blob)
            .context("localizer blob has the wrong shape")?
            .into_tensor();
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .context("face detector inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("face detector produced no outputs"))?;
        let rows = output
            .to_array_view::<f32>()
            .context("face detector output was not f32")?;
        let values: Vec<f32> = rows.iter().copied().collect();

        Ok(values
            .chunks_exact(7)
            .filter(|row| row[2].is_finite())
            .map(|row| FaceCandidate {
                confidence: row[2],
                rel_box: [row[3], row[4], row[5], row[6]],
            })
            .collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.size;
        let blank = Frame::new(
            vec![0u8; (size as usize) * (size as usize) * 3],
            size,
            size,
            crate::frame::ChannelOrder::Bgr,
        )?;
        self.localize(&blank).map(|_| ())
    }
}

/// MobileNetV2 mask classifier.
///
/// The ONNX graph is kept un-specialised and a plan is compiled per batch size
/// the first time that size is seen.
pub struct TractMaskClassifier {
    model: InferenceModel,
    plans: HashMap<usize, Plan>,
    size: u32,
}

impl TractMaskClassifier {
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to load mask classifier from {}", path.display()))?;
        let mut classifier = Self {
            model,
            plans: HashMap::new(),
            size: CLASSIFIER_INPUT_SIZE,
        };
        // surface graph errors at startup rather than on the first face
        classifier.plan_for(1)?;
        Ok(classifier)
    }

    fn plan_for(&mut self, batch: usize) -> Result<&Plan> {
        if !self.plans.contains_key(&batch) {
            let side = self.size as usize;
            let plan = self
                .model
                .clone()
                .with_input_fact(
                    0,
                    InferenceFact::dt_shape(f32::datum_type(), tvec!(batch, side, side, 3)),
                )
                .context("failed to set mask classifier input fact")?
                .into_optimized()
                .with_context(|| format!("failed to optimize mask classifier for batch {}", batch))?
                .into_runnable()
                .context("failed to build runnable mask classifier")?;
            log::debug!("compiled mask classifier plan for batch size {}", batch);
            self.plans.insert(batch, plan);
        }
        self.plans
            .get(&batch)
            .ok_or_else(|| anyhow!("missing plan for batch size {}", batch))
    }
}

impl MaskClassifier for TractMaskClassifier {
    fn name(&self) -> &'static str {
        "tract-mobilenetv2"
    }

    fn input_size(&self) -> u32 {
        self.size
    }

    fn classify(&mut self, batch: &FaceBatch) -> Result<Vec<MaskScores>> {
        if batch.input_size() != self.size {
            return Err(anyhow!(
                "face batch is {}px, classifier expects {}px",
                batch.input_size(),
                self.size
            ));
        }
        let side = self.size as usize;
        let mut scores = Vec::with_capacity(batch.len());
        let mut start = 0;
        while start < batch.len() {
            let count = (batch.len() - start).min(MAX_CLASSIFIER_BATCH);
            let input = tract_ndarray::Array4::from_shape_vec(
                (count, side, side, 3),
                batch.faces(start, count).to_vec(),
            )
            .context("face batch has the wrong shape")?
            .into_tensor();
            let plan = self.plan_for(count)?;
            let outputs = plan
                .run(tvec!(input.into()))
                .context("mask classifier inference failed")?;
            let output = outputs
                .first()
                .ok_or_else(|| anyhow!("mask classifier produced no outputs"))?;
            let values: Vec<f32> = output
                .to_array_view::<f32>()
                .context("mask classifier output was not f32")?
                .iter()
                .copied()
                .collect();
            if values.len() != count * 2 {
                return Err(anyhow!(
                    "mask classifier returned {} values for {} faces",
                    values.len(),
                    count
                ));
            }
            scores.extend(values.chunks_exact(2).map(|pair| MaskScores {
                masked: pair[0],
                unmasked: pair[1],
            }));
            start += count;
        }
        Ok(scores)
    }
}
