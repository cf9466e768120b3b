use anyhow::{Context, Result};

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::{ChannelOrder, Frame};

/// Generated BGR frames for `stub://` URIs.
///
/// A `frames=N` query (`stub://cam?frames=3`) or `SourceConfig::max_frames`
/// makes the source finite.
pub struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    limit: Option<u64>,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        let limit = config.max_frames.or_else(|| frame_limit(&config.uri));
        Self {
            config,
            frame_count: 0,
            limit,
            connected: false,
        }
    }

    fn generate(&self) -> Result<Frame> {
        let (w, h) = (self.config.width, self.config.height);
        let shift = self.frame_count as usize;
        let mut pixels = Vec::with_capacity((w as usize) * (h as usize) * 3);
        for y in 0..h as usize {
            for x in 0..w as usize {
                pixels.push(((x + shift) % 256) as u8);
                pixels.push(((y + shift) % 256) as u8);
                pixels.push(((x + y) % 256) as u8);
            }
        }
        Frame::new(pixels, w, h, ChannelOrder::Bgr).context("synthetic frame")
    }
}

fn frame_limit(uri: &str) -> Option<u64> {
    let (_, query) = uri.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "frames")
        .and_then(|(_, value)| value.parse().ok())
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("SyntheticSource: connected to {}", self.config.uri);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        let frame = self.generate()?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if self.connected {
            log::debug!("SyntheticSource: released {}", self.config.uri);
        }
        self.connected = false;
    }

    fn is_healthy(&self) -> bool {
        self.connected
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

    #[test]
    fn query_limits_frame_count() -> Result<()> {
        let mut source = SyntheticSource::new(SourceConfig {
            uri: "stub://cam?frames=2".to_string(),
            width: 8,
            height: 6,
            ..SourceConfig::default()
        });
        source.connect()?;
        let first = source.next_frame()?.expect("first frame");
        assert_eq!((first.width, first.height), (8, 6));
        assert_eq!(first.order(), ChannelOrder::Bgr);
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn unlimited_without_query() -> Result<()> {
        let mut source = SyntheticSource::new(SourceConfig {
            uri: "stub://cam".to_string(),
            width: 4,
            height: 4,
            ..SourceConfig::default()
        });
        source.connect()?;
        for _ in 0..5 {
            assert!(source.next_frame()?.is_some());
        }
        source.release();
        assert!(!source.is_healthy());
        Ok(())
    }
}
