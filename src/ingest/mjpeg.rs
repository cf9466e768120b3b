//! HTTP MJPEG camera source.
//!
//! Connects to a `multipart/x-mixed-replace` endpoint (IP cameras, another
//! maskwatch instance) or polls a single-JPEG snapshot URL.

use std::io::Read;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{health_grace, FrameSource, MalformedFrame, SourceConfig, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub struct MjpegSource {
    config: SourceConfig,
    url: Url,
    stream: Option<HttpStream>,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Multipart(JpegScanner),
    Snapshot,
}

impl MjpegSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let url = Url::parse(&config.uri)
            .with_context(|| format!("invalid camera url {}", config.uri))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("mjpeg source needs an http(s) url, got {}", url));
        }
        Ok(Self {
            config,
            url,
            stream: None,
            connected_at: None,
            last_frame_at: None,
            frame_count: 0,
            last_error: None,
        })
    }

    fn read_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("mjpeg source not connected; call connect() first"))?;
        match stream {
            HttpStream::Multipart(scanner) => scanner.next_jpeg(),
            HttpStream::Snapshot => fetch_snapshot(self.url.as_str()).map(Some),
        }
    }
}

impl FrameSource for MjpegSource {
    fn name(&self) -> &'static str {
        "mjpeg"
    }

    fn connect(&mut self) -> Result<()> {
        let response = ureq::get(self.url.as_str())
            .call()
            .with_context(|| format!("connect to camera {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        self.stream = Some(if content_type.to_ascii_lowercase().contains("multipart") {
            HttpStream::Multipart(JpegScanner::new(response.into_reader()))
        } else {
            HttpStream::Snapshot
        });
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        log::info!("MjpegSource: connected to {}", self.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let min_interval = frame_interval(self.config.target_fps);
        loop {
            let jpeg = match self.read_jpeg() {
                Ok(Some(jpeg)) => jpeg,
                Ok(None) => {
                    log::info!("MjpegSource: {} ended", self.url);
                    return Ok(None);
                }
                Err(err) => {
                    self.last_error = Some(err.to_string());
                    return Err(err);
                }
            };

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    continue;
                }
            }

            let image = image::load_from_memory(&jpeg)
                .context("decode jpeg")
                .context(MalformedFrame)?;
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            return Ok(Some(Frame::from_rgb_image(image.into_rgb8())));
        }
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            log::info!("MjpegSource: released {}", self.url);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
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

/// Pulls whole JPEG images (SOI..EOI) out of a byte stream, ignoring
/// whatever multipart framing sits between them.
struct JpegScanner {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl JpegScanner {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let jpeg = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(jpeg));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let drain_len = self.buffer.len() - 2;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_snapshot(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}
