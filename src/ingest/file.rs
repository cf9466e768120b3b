//! Local still-image source.
//!
//! Decodes one image at connect time and hands out copies of it, which is
//! enough to exercise the whole pipeline on a machine without a camera.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

pub struct StillImageSource {
    config: SourceConfig,
    frame: Option<Frame>,
    frame_count: u64,
}

impl StillImageSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            frame: None,
            frame_count: 0,
        }
    }
}

impl FrameSource for StillImageSource {
    fn name(&self) -> &'static str {
        "still-image"
    }

    fn connect(&mut self) -> Result<()> {
        let path = PathBuf::from(&self.config.uri);
        let image = image::open(&path)
            .with_context(|| format!("failed to decode image {}", path.display()))?;
        let frame = Frame::from_rgb_image(image.into_rgb8());
        log::info!(
            "StillImageSource: loaded {} ({}x{})",
            path.display(),
            frame.width,
            frame.height
        );
        self.frame = Some(frame);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = self
            .frame
            .as_ref()
            .ok_or_else(|| anyhow!("still image source not connected; call connect() first"))?;
        if self
            .config
            .max_frames
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Ok(None);
        }
        self.frame_count += 1;
        Ok(Some(frame.clone()))
    }

    fn release(&mut self) {
        self.frame = None;
    }

    fn is_healthy(&self) -> bool {
        self.frame.is_some()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.uri.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn repeats_decoded_image_until_limit() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("door.jpg");
        RgbImage::from_pixel(12, 9, Rgb([10, 20, 30])).save(&path)?;

        let mut source = StillImageSource::new(SourceConfig {
            uri: path.to_string_lossy().to_string(),
            max_frames: Some(2),
            ..SourceConfig::default()
        });
        assert!(source.next_frame().is_err());
        source.connect()?;
        let frame = source.next_frame()?.expect("frame");
        let px = frame.rgb_at(3, 3).expect("pixel");
        for (got, want) in px.iter().zip([10u8, 20, 30]) {
            assert!(got.abs_diff(want) <= 4, "{:?}", px);
        }
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn missing_file_fails_to_connect() {
        let mut source = StillImageSource::new(SourceConfig {
            uri: "/nonexistent/frame.jpg".to_string(),
            ..SourceConfig::default()
        });
        assert!(source.connect().is_err());
        assert!(!source.is_healthy());
    }
}
