//! Concrete capability handles for the battery monitor.
//!
//! The ADC and LEDs are reached through sysfs attribute files (IIO raw
//! voltage and gpio/led brightness nodes), which keeps this crate free of
//! board-specific driver bindings. Power actions shell out to the standard
//! system utilities.

use std::{fs, path::PathBuf, process::Command};

use anyhow::{Context, Result, bail};

use crate::battery::{Adc, Led, PowerControl, StatusLeds};

/// ADC sampled from a sysfs attribute such as
/// `/sys/bus/iio/devices/iio:device0/in_voltage0_raw`.
pub struct SysfsAdc {
    path: PathBuf,
}

impl SysfsAdc {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Adc for SysfsAdc {
    fn read(&mut self) -> Result<u16> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read adc at {}", self.path.display()))?;
        text.trim()
            .parse::<u16>()
            .with_context(|| format!("adc value {:?} is not an integer", text.trim()))
    }
}

/// Red/green LED pair driven through sysfs brightness attributes.
pub struct SysfsLeds {
    red: PathBuf,
    green: PathBuf,
}

impl SysfsLeds {
    pub fn new(red: PathBuf, green: PathBuf) -> Self {
        Self { red, green }
    }
}

impl StatusLeds for SysfsLeds {
    fn set(&mut self, led: Led, on: bool) -> Result<()> {
        let path = match led {
            Led::Red => &self.red,
            Led::Green => &self.green,
        };
        fs::write(path, if on { "1" } else { "0" })
            .with_context(|| format!("failed to drive led at {}", path.display()))
    }
}

/// Power actions via `wall` and `shutdown`.
pub struct SystemPower;

impl PowerControl for SystemPower {
    fn broadcast(&mut self, message: &str) -> Result<()> {
        let status = Command::new("wall")
            .arg(message)
            .status()
            .context("failed to run wall")?;
        if !status.success() {
            bail!("wall exited with {status}");
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        let _ = Command::new("logger")
            .args(["-t", "road-sentry", "** Low Battery - shutting down now **"])
            .status();
        Command::new("shutdown")
            .args(["-h", "now"])
            .status()
            .context("failed to run shutdown")?;
        Ok(())
    }
}
