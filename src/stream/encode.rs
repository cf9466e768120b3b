use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, GrayImage, Luma};

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// JPEG-compresses rendered frames and wraps them in multipart framing.
pub struct FrameEncoder {
    quality: u8,
    fallback: Arc<DynamicImage>,
}

impl FrameEncoder {
    pub fn new(quality: u8, fallback: DynamicImage) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            fallback: Arc::new(fallback),
        }
    }

    /// Image shown in place of the camera while the feed is disabled.
    pub fn fallback(&self) -> Arc<DynamicImage> {
        Arc::clone(&self.fallback)
    }

    pub fn encode_jpeg(&self, image: &DynamicImage) -> Result<Vec<u8>> {
        let (raw, width, height, color) = match image {
            DynamicImage::ImageLuma8(gray) => (
                gray.as_raw().clone(),
                gray.width(),
                gray.height(),
                ExtendedColorType::L8,
            ),
            other => {
                let rgb = other.to_rgb8();
                let (width, height) = rgb.dimensions();
                (rgb.into_raw(), width, height, ExtendedColorType::Rgb8)
            }
        };
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode(&raw, width, height, color)
            .context("jpeg encode failed")?;
        Ok(out)
    }

    /// One multipart part: boundary line, part header, JPEG body, trailer.
    pub fn multipart_chunk(&self, image: &DynamicImage) -> Result<Vec<u8>> {
        let jpeg = self.encode_jpeg(image)?;
        let mut chunk = Vec::with_capacity(jpeg.len() + 64);
        chunk.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        chunk.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
        chunk.extend_from_slice(&jpeg);
        chunk.extend_from_slice(b"\r\n\r\n");
        Ok(chunk)
    }
}

/// Load the disabled-feed image as grayscale, or generate a plain gray card
/// when the file is missing or unreadable.
pub fn load_fallback(path: &Path) -> DynamicImage {
    match image::open(path) {
        Ok(image) => DynamicImage::ImageLuma8(image.into_luma8()),
        Err(err) => {
            log::warn!(
                "fallback image {} unavailable ({}), using placeholder",
                path.display(),
                err
            );
            placeholder()
        }
    }
}

fn placeholder() -> DynamicImage {
    let (w, h) = (500u32, 375u32);
    DynamicImage::ImageLuma8(GrayImage::from_fn(w, h, |x, y| {
        if x < 4 || y < 4 || x >= w - 4 || y >= h - 4 {
            Luma([200])
        } else {
            Luma([64])
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn chunk_has_boundary_header_and_jpeg_body() -> Result<()> {
        let encoder = FrameEncoder::new(DEFAULT_JPEG_QUALITY, placeholder());
        let chunk =
            encoder.multipart_chunk(&DynamicImage::ImageRgb8(RgbImage::new(16, 12)))?;
        let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(chunk.starts_with(header));
        assert!(chunk.ends_with(b"\r\n\r\n"));

        let body = &chunk[header.len()..chunk.len() - 4];
        assert_eq!(&body[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(body)?;
        assert_eq!((decoded.width(), decoded.height()), (16, 12));
        Ok(())
    }

    #[test]
    fn missing_fallback_yields_grayscale_placeholder() {
        let image = load_fallback(Path::new("/nonexistent/logo.jpeg"));
        assert!(matches!(image, DynamicImage::ImageLuma8(_)));
    }

    #[test]
    fn fallback_file_is_read_as_grayscale() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("logo.jpeg");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, image::Rgb([200, 20, 20])))
            .save(&path)?;
        let image = load_fallback(&path);
        assert!(matches!(image, DynamicImage::ImageLuma8(_)));
        assert_eq!((image.width(), image.height()), (10, 10));
        Ok(())
    }
}
