use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::{FeedbackSink, HatSettings};

/// MIDI note and duration of the alert tone.
const ALERT_NOTE: u8 = 60;
const ALERT_DURATION: Duration = Duration::from_secs(1);

const I2C_SLAVE: u64 = 0x0703;
const HT16K33_OSC_ON: u8 = 0x21;
const HT16K33_DISPLAY_ON: u8 = 0x81;
const HT16K33_BRIGHTNESS: u8 = 0xE0;
const DISPLAY_DIGITS: usize = 4;

/// Frequency in Hz of a MIDI note, A4 = 69 = 440 Hz.
pub fn midi_frequency(note: u8) -> f64 {
    440.0 * 2f64.powf((note as f64 - 69.0) / 12.0)
}

/// Piezo buzzer on a sysfs PWM channel.
pub struct PwmBuzzer {
    channel_dir: PathBuf,
    generation: Arc<AtomicU64>,
}

impl PwmBuzzer {
    pub fn open(chip: &str, channel: u32) -> Result<Self> {
        let chip = Path::new(chip);
        if !chip.is_dir() {
            return Err(anyhow!("pwm chip {} not found", chip.display()));
        }
        let channel_dir = chip.join(format!("pwm{}", channel));
        if !channel_dir.is_dir() {
            fs::write(chip.join("export"), channel.to_string())
                .with_context(|| format!("failed to export pwm channel {}", channel))?;
        }
        Ok(Self {
            channel_dir,
            generation: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Start a tone and return immediately; a timer thread silences it.
    pub fn play(&self, note: u8, duration: Duration) -> Result<()> {
        let period_ns = (1e9 / midi_frequency(note)).round() as u64;
        write_attr(&self.channel_dir, "enable", "0")?;
        write_attr(&self.channel_dir, "duty_cycle", "0")?;
        write_attr(&self.channel_dir, "period", &period_ns.to_string())?;
        write_attr(&self.channel_dir, "duty_cycle", &(period_ns / 2).to_string())?;
        write_attr(&self.channel_dir, "enable", "1")?;

        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = Arc::clone(&self.generation);
        let dir = self.channel_dir.clone();
        thread::spawn(move || {
            thread::sleep(duration);
            // a newer tone owns the channel now
            if generation.load(Ordering::SeqCst) == ticket {
                if let Err(err) = write_attr(&dir, "enable", "0") {
                    log::debug!("failed to silence buzzer: {:#}", err);
                }
            }
        });
        Ok(())
    }
}

fn write_attr(dir: &Path, name: &str, value: &str) -> Result<()> {
    let path = dir.join(name);
    fs::write(&path, value).with_context(|| format!("failed to write {}", path.display()))
}

/// Four-digit 14-segment display behind an HT16K33 driver.
pub struct Ht16k33Display {
    device: File,
}

impl Ht16k33Display {
    pub fn open(bus: &str, addr: u16) -> Result<Self> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(bus)
            .with_context(|| format!("failed to open i2c bus {}", bus))?;
        let rc = unsafe { libc::ioctl(device.as_raw_fd(), I2C_SLAVE as _, addr as libc::c_ulong) };
        if rc < 0 {
            return Err(anyhow!(
                "failed to select i2c address {:#04x}: {}",
                addr,
                std::io::Error::last_os_error()
            ));
        }
        let mut display = Self { device };
        display.command(HT16K33_OSC_ON)?;
        display.command(HT16K33_DISPLAY_ON)?;
        display.command(HT16K33_BRIGHTNESS | 0x0F)?;
        Ok(display)
    }

    fn command(&mut self, byte: u8) -> Result<()> {
        self.device
            .write_all(&[byte])
            .context("i2c command write failed")
    }

    pub fn show(&mut self, text: &str) -> Result<()> {
        self.device
            .write_all(&encode_display(text))
            .context("i2c display write failed")
    }
}

/// Display RAM write for the first four characters of `text`.
pub fn encode_display(text: &str) -> [u8; 1 + DISPLAY_DIGITS * 2] {
    let mut buf = [0u8; 1 + DISPLAY_DIGITS * 2];
    for (i, ch) in text.chars().take(DISPLAY_DIGITS).enumerate() {
        let [lo, hi] = segments(ch).to_le_bytes();
        buf[1 + i * 2] = lo;
        buf[2 + i * 2] = hi;
    }
    buf
}

fn segments(ch: char) -> u16 {
    match ch {
        '0' => 0x0C3F,
        '1' => 0x0006,
        '2' => 0x00DB,
        '3' => 0x008F,
        '4' => 0x00E6,
        '5' => 0x2069,
        '6' => 0x00FD,
        '7' => 0x0007,
        '8' => 0x00FF,
        '9' => 0x00EF,
        '-' => 0x00C0,
        _ => 0x0000,
    }
}

/// Pimoroni Rainbow HAT: buzzer plus alphanumeric display.
pub struct RainbowHatSink {
    buzzer: PwmBuzzer,
    display: Ht16k33Display,
    shown: Option<String>,
}

impl RainbowHatSink {
    pub fn open(settings: &HatSettings) -> Result<Self> {
        let buzzer = PwmBuzzer::open(&settings.pwm_chip, settings.pwm_channel)?;
        let display = Ht16k33Display::open(&settings.i2c_bus, settings.display_addr)?;
        Ok(Self {
            buzzer,
            display,
            shown: None,
        })
    }
}

impl FeedbackSink for RainbowHatSink {
    fn name(&self) -> &'static str {
        "rainbowhat"
    }

    fn alert(&mut self) -> Result<()> {
        self.buzzer.play(ALERT_NOTE, ALERT_DURATION)
    }

    fn show(&mut self, text: &str) -> Result<()> {
        if self.shown.as_deref() == Some(text) {
            return Ok(());
        }
        self.display.show(text)?;
        self.shown = Some(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn middle_c_frequency() {
        assert!((midi_frequency(69) - 440.0).abs() < 1e-9);
        assert!((midi_frequency(60) - 261.6256).abs() < 1e-3);
    }

    #[test]
    fn display_buffer_is_little_endian_and_truncated() {
        let buf = encode_display("0101x");
        assert_eq!(buf[0], 0x00);
        assert_eq!(&buf[1..3], &[0x3F, 0x0C]);
        assert_eq!(&buf[3..5], &[0x06, 0x00]);
        assert_eq!(buf.len(), 9);

        let paused = encode_display("----");
        assert!(paused[1..].chunks(2).all(|c| c == [0xC0, 0x00]));
    }

    #[test]
    fn buzzer_drives_sysfs_attributes() -> Result<()> {
        let chip = tempfile::tempdir()?;
        fs::create_dir(chip.path().join("pwm1"))?;
        let chip_path = chip.path().to_string_lossy().to_string();
        let buzzer = PwmBuzzer::open(&chip_path, 1)?;
        buzzer.play(60, Duration::from_millis(10))?;

        let dir = chip.path().join("pwm1");
        assert_eq!(fs::read_to_string(dir.join("period"))?, "3822256");
        assert_eq!(fs::read_to_string(dir.join("duty_cycle"))?, "1911128");
        thread::sleep(Duration::from_millis(200));
        assert_eq!(fs::read_to_string(dir.join("enable"))?, "0");
        Ok(())
    }
}
