//! Frame overlays and per-frame counts.
//!
//! Labels are drawn with a TrueType font when one can be loaded, and with a
//! built-in 5x7 bitmap font otherwise.

mod glyphs;

use std::path::Path;
use std::sync::Arc;

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detect::{Detection, MaskLabel};

use glyphs::{glyph, GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};

/// Font tried when the configuration does not name one.
pub const DEFAULT_LABEL_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";
/// Height of TrueType labels in image pixels.
const LABEL_PX: f32 = 18.0;

pub const MASKED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNMASKED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const MASKED_TEXT: &str = "Thank You. Mask On.";
pub const UNMASKED_TEXT: &str = "No Face Mask Detected";
/// Display text while the video feed is disabled.
pub const PAUSED_DISPLAY: &str = "----";

impl MaskLabel {
    pub fn color(self) -> Rgb<u8> {
        match self {
            MaskLabel::Masked => MASKED_COLOR,
            MaskLabel::Unmasked => UNMASKED_COLOR,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            MaskLabel::Masked => MASKED_TEXT,
            MaskLabel::Unmasked => UNMASKED_TEXT,
        }
    }
}

/// Masked/unmasked counts for the frame being annotated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameTally {
    pub masked: u32,
    pub unmasked: u32,
}

impl FrameTally {
    pub fn record(&mut self, label: MaskLabel) {
        match label {
            MaskLabel::Masked => self.masked += 1,
            MaskLabel::Unmasked => self.unmasked += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.masked + self.unmasked
    }

    /// Four-character display code `0{masked}0{unmasked}`.
    ///
    /// Counts of ten or more widen the string; the display shows what fits.
    pub fn display_code(&self) -> String {
        format!("0{}0{}", self.masked, self.unmasked)
    }
}

pub fn load_label_font(path: &Path) -> Result<FontVec> {
    let data =
        std::fs::read(path).with_context(|| format!("read label font {}", path.display()))?;
    FontVec::try_from_vec(data)
        .map_err(|err| anyhow!("invalid label font {}: {}", path.display(), err))
}

/// Draws boxes and labels onto RGB frames.
#[derive(Clone)]
pub struct Annotator {
    pub thickness: u32,
    /// Offset of the label baseline from the box's top-left corner.
    pub label_offset: (i32, i32),
    /// Bitmap font pixel size in image pixels.
    pub text_scale: u32,
    font: Option<Arc<FontVec>>,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            thickness: 2,
            label_offset: (-50, -10),
            text_scale: 2,
            font: None,
        }
    }
}

impl Annotator {
    /// Use `path` for labels, keeping the bitmap font if it cannot be loaded.
    pub fn from_font_path(path: Option<&Path>) -> Self {
        let annotator = Self::default();
        let Some(path) = path else {
            return annotator;
        };
        match load_label_font(path) {
            Ok(font) => {
                log::info!("label font: {}", path.display());
                annotator.with_font(font)
            }
            Err(err) => {
                log::warn!("{:#}; using built-in bitmap labels", err);
                annotator
            }
        }
    }

    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(Arc::new(font));
        self
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn draw(&self, image: &mut RgbImage, detection: &Detection) {
        let color = detection.label.color();
        let bbox = detection.bbox;
        for i in 0..self.thickness {
            let x = bbox.start_x as i32 - i as i32;
            let y = bbox.start_y as i32 - i as i32;
            let w = bbox.width() + 2 * i;
            let h = bbox.height() + 2 * i;
            if w == 0 || h == 0 {
                continue;
            }
            draw_hollow_rect_mut(image, Rect::at(x, y).of_size(w, h), color);
        }

        let baseline_x = bbox.start_x as i32 + self.label_offset.0;
        let baseline_y = bbox.start_y as i32 + self.label_offset.1;
        let text = detection.label.text();
        match &self.font {
            Some(font) => {
                let top = baseline_y - LABEL_PX as i32;
                draw_text_mut(
                    image,
                    color,
                    baseline_x,
                    top,
                    PxScale::from(LABEL_PX),
                    &**font,
                    text,
                );
            }
            None => {
                let top = baseline_y - (GLYPH_HEIGHT * self.text_scale) as i32;
                self.draw_bitmap_text(image, baseline_x, top, text, color);
            }
        }
    }

    /// Render `text` with its top-left corner at `(x, y)`, clipped to the image.
    fn draw_bitmap_text(&self, image: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
        let scale = self.text_scale.max(1) as i32;
        let (width, height) = (image.width() as i32, image.height() as i32);
        let mut pen_x = x;
        for ch in text.chars() {
            if let Some(rows) = glyph(ch) {
                for (row, bits) in rows.iter().enumerate() {
                    for col in 0..GLYPH_WIDTH {
                        if bits >> (GLYPH_WIDTH - 1 - col) & 1 == 0 {
                            continue;
                        }
                        let px0 = pen_x + col as i32 * scale;
                        let py0 = y + row as i32 * scale;
                        for dy in 0..scale {
                            for dx in 0..scale {
                                let (px, py) = (px0 + dx, py0 + dy);
                                if px >= 0 && py >= 0 && px < width && py < height {
                                    image.put_pixel(px as u32, py as u32, color);
                                }
                            }
                        }
                    }
                }
            }
            pen_x += GLYPH_ADVANCE as i32 * scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, MaskScores};
    use std::io::Write;

    fn detection(label_masked: bool) -> Detection {
        let scores = if label_masked {
            MaskScores {
                masked: 0.9,
                unmasked: 0.1,
            }
        } else {
            MaskScores {
                masked: 0.3,
                unmasked: 0.7,
            }
        };
        Detection::new(
            BoundingBox {
                start_x: 60,
                start_y: 40,
                end_x: 100,
                end_y: 90,
            },
            scores,
        )
    }

    #[test]
    fn tally_counts_and_display_code() {
        let mut tally = FrameTally::default();
        tally.record(MaskLabel::Masked);
        tally.record(MaskLabel::Unmasked);
        tally.record(MaskLabel::Unmasked);
        assert_eq!(tally.total(), 3);
        assert_eq!(tally.display_code(), "0102");
        assert_eq!(FrameTally::default().display_code(), "0000");

        tally.masked = 12;
        assert_eq!(tally.display_code(), "01202");
    }

    #[test]
    fn draws_colored_two_pixel_box() {
        let mut image = RgbImage::new(160, 120);
        Annotator::default().draw(&mut image, &detection(true));
        assert_eq!(*image.get_pixel(60, 60), MASKED_COLOR);
        assert_eq!(*image.get_pixel(59, 60), MASKED_COLOR);
        assert_eq!(*image.get_pixel(62, 60), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(80, 65), Rgb([0, 0, 0]));
    }

    #[test]
    fn unmasked_label_is_red_and_clipped_at_edges() {
        let mut image = RgbImage::new(120, 100);
        Annotator::default().draw(&mut image, &detection(false));
        assert_eq!(*image.get_pixel(70, 40), UNMASKED_COLOR);
        let label_pixels = image
            .enumerate_pixels()
            .filter(|(_, y, p)| *y < 30 && **p == UNMASKED_COLOR)
            .count();
        assert!(label_pixels > 0);
    }

    fn label_pixels(image: &RgbImage) -> usize {
        image
            .enumerate_pixels()
            .filter(|(_, y, p)| *y < 36 && p.0[0] > 0)
            .count()
    }

    #[test]
    fn missing_font_keeps_bitmap_labels() {
        let annotator = Annotator::from_font_path(Some(Path::new("/nonexistent/label.ttf")));
        assert!(!annotator.has_font());
        assert!(!Annotator::from_font_path(None).has_font());

        let mut image = RgbImage::new(160, 120);
        annotator.draw(&mut image, &detection(false));
        assert!(label_pixels(&image) > 0);
    }

    #[test]
    fn rejects_files_that_are_not_fonts() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"not a truetype font")?;
        assert!(load_label_font(file.path()).is_err());
        Ok(())
    }

    #[test]
    fn truetype_labels_when_font_is_installed() -> Result<()> {
        let path = Path::new(DEFAULT_LABEL_FONT);
        if !path.exists() {
            return Ok(());
        }
        let annotator = Annotator::default().with_font(load_label_font(path)?);
        assert!(annotator.has_font());

        let mut image = RgbImage::new(160, 120);
        annotator.draw(&mut image, &detection(false));
        assert_eq!(*image.get_pixel(70, 40), UNMASKED_COLOR);
        assert!(label_pixels(&image) > 0);
        Ok(())
    }
}
