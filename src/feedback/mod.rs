//! Physical feedback: alert buzzer and four-character display.

#[cfg(target_os = "linux")]
mod hat;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

#[cfg(target_os = "linux")]
pub use hat::{Ht16k33Display, PwmBuzzer, RainbowHatSink};

/// Device that can sound an alert and show a short status string.
///
/// Both calls are best effort. Implementations must not block the stream for
/// longer than it takes to start the effect.
pub trait FeedbackSink: Send {
    fn name(&self) -> &'static str;

    /// Short audible alert.
    fn alert(&mut self) -> Result<()>;

    /// Show up to four characters.
    fn show(&mut self, text: &str) -> Result<()>;
}

pub type SharedSink = Arc<Mutex<Box<dyn FeedbackSink>>>;

pub fn shared(sink: Box<dyn FeedbackSink>) -> SharedSink {
    Arc::new(Mutex::new(sink))
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoopSink;

impl FeedbackSink for NoopSink {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn alert(&mut self) -> Result<()> {
        Ok(())
    }

    fn show(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Headless sink that logs alerts and display changes.
#[derive(Debug, Default)]
pub struct LogSink {
    shown: Option<String>,
}

impl FeedbackSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn alert(&mut self) -> Result<()> {
        log::info!("alert: face without mask");
        Ok(())
    }

    fn show(&mut self, text: &str) -> Result<()> {
        if self.shown.as_deref() != Some(text) {
            log::debug!("display: {}", text);
            self.shown = Some(text.to_string());
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedbackEvent {
    Alert,
    Display(String),
}

/// Records every call, in order, into a shared log.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<FeedbackEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FeedbackEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn alerts(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, FeedbackEvent::Alert))
            .count()
    }

    pub fn last_display(&self) -> Option<String> {
        self.events().into_iter().rev().find_map(|e| match e {
            FeedbackEvent::Display(text) => Some(text),
            FeedbackEvent::Alert => None,
        })
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    fn push(&self, event: FeedbackEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("recording sink poisoned"))?
            .push(event);
        Ok(())
    }
}

impl FeedbackSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn alert(&mut self) -> Result<()> {
        self.push(FeedbackEvent::Alert)
    }

    fn show(&mut self, text: &str) -> Result<()> {
        self.push(FeedbackEvent::Display(text.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedbackKind {
    Log,
    Noop,
    /// Pimoroni Rainbow HAT on a Raspberry Pi.
    RainbowHat,
}

impl FromStr for FeedbackKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "noop" | "none" => Ok(Self::Noop),
            "rainbowhat" | "rainbow-hat" | "hat" => Ok(Self::RainbowHat),
            other => Err(anyhow!("unknown feedback sink '{}'", other)),
        }
    }
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Log => "log",
            Self::Noop => "noop",
            Self::RainbowHat => "rainbowhat",
        })
    }
}

/// Device paths for the Rainbow HAT sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HatSettings {
    pub pwm_chip: String,
    pub pwm_channel: u32,
    pub i2c_bus: String,
    pub display_addr: u16,
}

impl Default for HatSettings {
    fn default() -> Self {
        Self {
            pwm_chip: "/sys/class/pwm/pwmchip0".to_string(),
            pwm_channel: 1,
            i2c_bus: "/dev/i2c-1".to_string(),
            display_addr: 0x70,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedbackSettings {
    pub kind: FeedbackKind,
    pub hat: HatSettings,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            kind: FeedbackKind::Log,
            hat: HatSettings::default(),
        }
    }
}

/// Open the configured sink. Hardware that cannot be opened degrades to logging.
pub fn open_sink(settings: &FeedbackSettings) -> Box<dyn FeedbackSink> {
    match settings.kind {
        FeedbackKind::Log => Box::new(LogSink::default()),
        FeedbackKind::Noop => Box::new(NoopSink),
        FeedbackKind::RainbowHat => open_hat(&settings.hat),
    }
}

#[cfg(target_os = "linux")]
fn open_hat(settings: &HatSettings) -> Box<dyn FeedbackSink> {
    match RainbowHatSink::open(settings) {
        Ok(sink) => {
            log::info!("rainbow hat feedback ready");
            Box::new(sink)
        }
        Err(err) => {
            log::warn!("rainbow hat unavailable, logging feedback instead: {:#}", err);
            Box::new(LogSink::default())
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn open_hat(_settings: &HatSettings) -> Box<dyn FeedbackSink> {
    log::warn!("rainbow hat is only supported on linux, logging feedback instead");
    Box::new(LogSink::default())
}
