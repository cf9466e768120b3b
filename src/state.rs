//! Process-wide control flags and the last rendered frame.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use image::DynamicImage;

/// Shared between every stream loop and the control routes.
///
/// Flags are last-writer-wins. `last_rendered` is swapped whole under a
/// short lock, so readers may see a stale frame but never a torn one.
#[derive(Debug)]
pub struct ProcessState {
    alarm_enabled: AtomicBool,
    stream_enabled: AtomicBool,
    last_rendered: Mutex<Option<Arc<DynamicImage>>>,
}

impl Default for ProcessState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessState {
    /// Alarm armed and feed live.
    pub fn new() -> Self {
        Self {
            alarm_enabled: AtomicBool::new(true),
            stream_enabled: AtomicBool::new(true),
            last_rendered: Mutex::new(None),
        }
    }

    pub fn alarm_enabled(&self) -> bool {
        self.alarm_enabled.load(Ordering::Relaxed)
    }

    /// Flip the alarm flag, returning the new value.
    pub fn toggle_alarm(&self) -> bool {
        !self.alarm_enabled.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn stream_enabled(&self) -> bool {
        self.stream_enabled.load(Ordering::Relaxed)
    }

    pub fn set_stream_enabled(&self, enabled: bool) {
        self.stream_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Alerts fire only while armed and live.
    pub fn should_alert(&self) -> bool {
        self.alarm_enabled() && self.stream_enabled()
    }

    pub fn store_rendered(&self, image: Arc<DynamicImage>) {
        *self.rendered_slot() = Some(image);
    }

    pub fn last_rendered(&self) -> Option<Arc<DynamicImage>> {
        self.rendered_slot().clone()
    }

    /// Write the last rendered frame to `path`. Returns `false` when no frame
    /// has been rendered yet.
    pub fn save_snapshot(&self, path: &Path) -> Result<bool> {
        let Some(image) = self.last_rendered() else {
            return Ok(false);
        };
        image
            .save(path)
            .with_context(|| format!("failed to write snapshot to {}", path.display()))?;
        Ok(true)
    }

    fn rendered_slot(&self) -> MutexGuard<'_, Option<Arc<DynamicImage>>> {
        self.last_rendered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn alarm_toggles_independently_of_stream() {
        let state = ProcessState::new();
        assert!(state.should_alert());
        assert!(!state.toggle_alarm());
        assert!(!state.should_alert());
        assert!(state.stream_enabled());
        assert!(state.toggle_alarm());

        state.set_stream_enabled(false);
        assert!(state.alarm_enabled());
        assert!(!state.should_alert());
    }

    #[test]
    fn snapshot_requires_a_rendered_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("snap.jpg");
        let state = ProcessState::new();
        assert!(!state.save_snapshot(&path)?);
        assert!(!path.exists());

        state.store_rendered(Arc::new(DynamicImage::ImageRgb8(RgbImage::new(8, 6))));
        assert!(state.save_snapshot(&path)?);
        let saved = image::open(&path)?;
        assert_eq!((saved.width(), saved.height()), (8, 6));
        Ok(())
    }

    #[test]
    fn snapshot_to_missing_directory_errors() {
        let state = ProcessState::new();
        state.store_rendered(Arc::new(DynamicImage::ImageRgb8(RgbImage::new(2, 2))));
        assert!(state
            .save_snapshot(Path::new("/nonexistent/dir/snap.jpg"))
            .is_err());
    }
}
