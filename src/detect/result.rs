/// A face region proposed by a localizer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceCandidate {
    /// Localizer confidence in `[0, 1]`.
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` relative to frame width/height.
    pub rel_box: [f32; 4],
}

/// Classifier output for one face.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaskScores {
    pub masked: f32,
    pub unmasked: f32,
}

impl MaskScores {
    /// Masked only on a strict win; ties go to `Unmasked`.
    pub fn label(&self) -> MaskLabel {
        if self.masked > self.unmasked {
            MaskLabel::Masked
        } else {
            MaskLabel::Unmasked
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MaskLabel {
    Masked,
    Unmasked,
}

/// Pixel box with inclusive start and exclusive crop end.
///
/// Always satisfies `start_x < end_x <= width - 1` and `start_y < end_y <= height - 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub start_x: u32,
    pub start_y: u32,
    pub end_x: u32,
    pub end_y: u32,
}

impl BoundingBox {
    /// Scale a relative box to pixels and clamp it to the frame.
    ///
    /// Returns `None` when the clamped box has no area.
    pub fn from_relative(rel: [f32; 4], width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let w = width as f32;
        let h = height as f32;
        // truncation toward zero, then clamp
        let sx = ((rel[0] * w) as i64).max(0);
        let sy = ((rel[1] * h) as i64).max(0);
        let ex = ((rel[2] * w) as i64).min(width as i64 - 1);
        let ey = ((rel[3] * h) as i64).min(height as i64 - 1);
        if sx >= ex || sy >= ey {
            return None;
        }
        Some(Self {
            start_x: sx as u32,
            start_y: sy as u32,
            end_x: ex as u32,
            end_y: ey as u32,
        })
    }

    pub fn width(&self) -> u32 {
        self.end_x - self.start_x
    }

    pub fn height(&self) -> u32 {
        self.end_y - self.start_y
    }
}

/// A localized face paired with its classification.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: MaskLabel,
    pub scores: MaskScores,
}

impl Detection {
    pub fn new(bbox: BoundingBox, scores: MaskScores) -> Self {
        Self {
            bbox,
            label: scores.label(),
            scores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_favor_unmasked() {
        let even = MaskScores {
            masked: 0.5,
            unmasked: 0.5,
        };
        assert_eq!(even.label(), MaskLabel::Unmasked);
        let masked = MaskScores {
            masked: 0.51,
            unmasked: 0.49,
        };
        assert_eq!(masked.label(), MaskLabel::Masked);
    }

    #[test]
    fn boxes_clamp_to_frame() {
        let bbox = BoundingBox::from_relative([-0.2, -0.1, 1.4, 1.2], 500, 375).unwrap();
        assert_eq!(bbox.start_x, 0);
        assert_eq!(bbox.start_y, 0);
        assert_eq!(bbox.end_x, 499);
        assert_eq!(bbox.end_y, 374);
    }

    #[test]
    fn boxes_truncate_like_integer_casts() {
        let bbox = BoundingBox::from_relative([0.1, 0.2, 0.5, 0.6], 100, 50).unwrap();
        assert_eq!(
            (bbox.start_x, bbox.start_y, bbox.end_x, bbox.end_y),
            (10, 10, 50, 30)
        );
        assert_eq!(bbox.width(), 40);
        assert_eq!(bbox.height(), 20);
    }

    #[test]
    fn degenerate_boxes_are_dropped() {
        assert!(BoundingBox::from_relative([0.5, 0.5, 0.5, 0.9], 100, 100).is_none());
        assert!(BoundingBox::from_relative([1.2, 0.1, 1.5, 0.4], 100, 100).is_none());
        assert!(BoundingBox::from_relative([0.1, 0.1, 0.4, 0.4], 0, 100).is_none());
    }
}
