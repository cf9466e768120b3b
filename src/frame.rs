//! Frame container.
//!
//! - `Frame`: one captured pixel grid with an explicit channel order. Owned by a
//!   single loop iteration and dropped once the encoded chunk has been emitted.
//! - `FramePrep`: orientation and sizing applied right after capture.
//!
//! Pixel bytes stay private. Consumers read single pixels with `rgb_at()` or
//! convert to an RGB image with `to_rgb_image()`, which is where channel order
//! is fixed up for display and classification.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};

/// Default width every captured frame is scaled to.
pub const DEFAULT_RESIZE_WIDTH: u32 = 500;

/// Byte order of the three colour channels in a packed 24-bit frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// A single packed 24-bit frame.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    order: ChannelOrder,
}

impl Frame {
    /// Wrap packed pixel data. Fails when the buffer does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, order: ChannelOrder) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            order,
        })
    }

    /// A zero-sized frame. Detection on it yields nothing.
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            width: 0,
            height: 0,
            order: ChannelOrder::Rgb,
        }
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            order: ChannelOrder::Rgb,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    /// RGB value at `(x, y)`, regardless of storage order.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        let px = [self.data[idx], self.data[idx + 1], self.data[idx + 2]];
        Some(match self.order {
            ChannelOrder::Rgb => px,
            ChannelOrder::Bgr => [px[2], px[1], px[0]],
        })
    }

    /// Copy into an RGB image, swapping channels when stored as BGR.
    pub fn to_rgb_image(&self) -> RgbImage {
        let mut data = self.data.clone();
        if self.order == ChannelOrder::Bgr {
            for px in data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
        }
        ImageBuffer::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    /// Apply capture-time orientation and sizing. Channel order is preserved.
    pub fn prepare(self, prep: &FramePrep) -> Frame {
        if self.is_empty() || (!prep.flip_vertical && prep.resize_width.is_none()) {
            return self;
        }
        let order = self.order;
        // flip and resize are channel-agnostic, so the buffer is treated as opaque triples
        let Some(mut image) =
            ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(self.width, self.height, self.data)
        else {
            return Frame::empty();
        };
        if prep.flip_vertical {
            imageops::flip_vertical_in_place(&mut image);
        }
        if let Some(target) = prep.resize_width {
            if target > 0 && target != image.width() {
                let (w, h) = image.dimensions();
                let target_h = ((h as f64) * (target as f64) / (w as f64)).round().max(1.0) as u32;
                image = imageops::resize(&image, target, target_h, FilterType::Triangle);
            }
        }
        let (width, height) = image.dimensions();
        Frame {
            data: image.into_raw(),
            width,
            height,
            order,
        }
    }
}

/// Orientation and sizing applied to each captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramePrep {
    /// Flip top-to-bottom (camera mounted upside down).
    pub flip_vertical: bool,
    /// Scale to this width, keeping the aspect ratio.
    pub resize_width: Option<u32>,
}

impl Default for FramePrep {
    fn default() -> Self {
        Self {
            flip_vertical: false,
            resize_width: Some(DEFAULT_RESIZE_WIDTH),
        }
    }
}
