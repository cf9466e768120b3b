//! Tensor preparation for both inference stages.

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::detect::result::BoundingBox;
use crate::frame::Frame;

/// Square input side of the SSD face localizer.
pub const LOCALIZER_INPUT_SIZE: u32 = 300;
/// Per-channel means (B, G, R) subtracted from the localizer blob.
pub const LOCALIZER_MEAN_BGR: [f32; 3] = [104.0, 177.0, 123.0];
/// Square input side of the mask classifier.
pub const CLASSIFIER_INPUT_SIZE: u32 = 224;

/// Build the NCHW, BGR, mean-subtracted localizer input for a frame.
pub fn localizer_blob(frame: &Frame, size: u32) -> Vec<f32> {
    let rgb = frame.to_rgb_image();
    let resized = imageops::resize(&rgb, size, size, FilterType::Triangle);
    let plane = (size as usize) * (size as usize);
    let mut blob = vec![0f32; plane * 3];
    for (i, px) in resized.pixels().enumerate() {
        let [r, g, b] = px.0;
        blob[i] = b as f32 - LOCALIZER_MEAN_BGR[0];
        blob[plane + i] = g as f32 - LOCALIZER_MEAN_BGR[1];
        blob[2 * plane + i] = r as f32 - LOCALIZER_MEAN_BGR[2];
    }
    blob
}

/// Batch of face crops laid out NHWC, scaled to `[-1, 1]`.
#[derive(Clone, Debug)]
pub struct FaceBatch {
    size: u32,
    len: usize,
    data: Vec<f32>,
}

impl FaceBatch {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            len: 0,
            data: Vec::new(),
        }
    }

    /// Crop `bbox` out of `frame`, resize to the batch size, and append it.
    pub fn push_crop(&mut self, frame: &RgbImage, bbox: &BoundingBox) {
        let crop = imageops::crop_imm(
            frame,
            bbox.start_x,
            bbox.start_y,
            bbox.width(),
            bbox.height(),
        )
        .to_image();
        let face = imageops::resize(&crop, self.size, self.size, FilterType::Triangle);
        self.data.reserve(face.as_raw().len());
        // MobileNetV2 scaling
        self.data
            .extend(face.as_raw().iter().map(|&v| v as f32 / 127.5 - 1.0));
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn input_size(&self) -> u32 {
        self.size
    }

    /// Number of floats in one face tensor.
    pub fn face_stride(&self) -> usize {
        (self.size as usize) * (self.size as usize) * 3
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Faces `start..start + count` as one contiguous slice.
    pub fn faces(&self, start: usize, count: usize) -> &[f32] {
        let stride = self.face_stride();
        let end = (start + count).min(self.len);
        &self.data[start.min(end) * stride..end * stride]
    }
}
