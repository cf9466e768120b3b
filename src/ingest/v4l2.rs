//! USB webcam source over V4L2.
//!
//! Negotiates packed RGB24 and falls back to YUYV, the format nearly every
//! UVC webcam offers. Buffers are memory-mapped; each captured buffer is
//! converted and copied into a `Frame` before the next dequeue.

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{health_grace, FrameSource, MalformedFrame, SourceConfig, SourceStats};
use crate::frame::{ChannelOrder, Frame};

const BUFFER_COUNT: u32 = 4;

pub struct V4l2Source {
    config: SourceConfig,
    state: Option<DeviceState>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Rgb24,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn negotiate(&self, device: &v4l::Device) -> Result<v4l::Format> {
        use v4l::video::Capture;

        let mut wanted = device.format().context("read v4l2 format")?;
        wanted.width = self.config.width;
        wanted.height = self.config.height;
        for fourcc in [b"RGB3", b"YUYV"] {
            wanted.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&wanted) {
                Ok(actual) if PixelFormat::from_fourcc(&actual.fourcc.repr).is_some() => {
                    return Ok(actual)
                }
                Ok(actual) => log::debug!(
                    "V4l2Source: {} answered {} for {}",
                    self.config.uri,
                    actual.fourcc,
                    String::from_utf8_lossy(fourcc)
                ),
                Err(err) => log::warn!(
                    "V4l2Source: failed to set {} on {}: {}",
                    String::from_utf8_lossy(fourcc),
                    self.config.uri,
                    err
                ),
            }
        }
        Err(anyhow!(
            "{} supports neither RGB3 nor YUYV capture",
            self.config.uri
        ))
    }
}

impl FrameSource for V4l2Source {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.config.uri)
            .with_context(|| format!("open v4l2 device {}", self.config.uri))?;
        let format = self.negotiate(&device)?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.uri,
                    err
                );
            }
        }

        self.format = PixelFormat::from_fourcc(&format.fourcc.repr)
            .ok_or_else(|| anyhow!("unsupported capture format {}", format.fourcc))?;
        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.config.uri,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, _meta)| buf.to_vec())
        });
        let buf = captured.map_err(|err| {
            self.last_error = Some(err.to_string());
            anyhow::Error::new(err).context("capture v4l2 frame")
        })?;

        let rgb = normalize_to_rgb(&buf, self.active_width, self.active_height, self.format)
            .context(MalformedFrame)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(rgb, self.active_width, self.active_height, ChannelOrder::Rgb)
            .context(MalformedFrame)
            .map(Some)
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.config.uri);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= health_grace(self.config.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.uri.clone(),
        }
    }
}
