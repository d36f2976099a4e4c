//! Battery-voltage hysteresis state machine and its monitor loop.
//!
//! The monitor runs on its own thread, fully decoupled from the perception
//! loop: the two communicate with the outside world only through write-only
//! LEDs. One `sample` is deliberately blocking — a solid pattern holds for
//! one polling interval, a blinking pattern runs whole cycles within it — so
//! the polling cadence is governed by the active pattern, not a timer.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use anyhow::Result;
use tracing::{info, warn};

pub const MAX_BATTERY: f32 = 4.05;
pub const MIN_BATTERY: f32 = 3.75;

pub const MIN_FRACTION: f32 = 0.075;
pub const SAFE_FRACTION: f32 = 0.25;
pub const MIDDLE_FRACTION: f32 = 0.15;
pub const DANGER_FRACTION: f32 = 0.10;

pub const ADC_MAX: f32 = 2048.0;
pub const ADC_REF_VOLTAGE: f32 = 4.096;
pub const FIRST_RESISTOR: f32 = 6_800.0;
pub const SECOND_RESISTOR: f32 = 10_000.0;

pub const LED_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const BLINK_INTERVAL: Duration = Duration::from_secs(1);
pub const FAST_INTERVAL: Duration = Duration::from_millis(500);
pub const SHUTDOWN_DELAY: Duration = Duration::from_secs(30);

/// One decoded ADC sample. `fraction` is linearly normalised between
/// MIN_BATTERY and MAX_BATTERY and deliberately unclamped: values below 0
/// or above 1 carry information.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatteryReading {
    pub adc_raw: u16,
    pub input_voltage: f32,
    pub battery_voltage: f32,
    pub fraction: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatteryBand {
    Safe,
    Middle,
    Danger,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Led {
    Red,
    Green,
}

/// LED behaviour selected by a band. Zero on/off intervals mean "hold solid
/// for one polling interval".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedPattern {
    pub led: Led,
    pub time_on: Duration,
    pub time_off: Duration,
}

impl LedPattern {
    pub fn is_solid(&self) -> bool {
        self.time_on.is_zero() && self.time_off.is_zero()
    }
}

impl BatteryBand {
    pub fn pattern(self) -> LedPattern {
        match self {
            BatteryBand::Safe => LedPattern {
                led: Led::Green,
                time_on: Duration::ZERO,
                time_off: Duration::ZERO,
            },
            BatteryBand::Middle => LedPattern {
                led: Led::Red,
                time_on: Duration::ZERO,
                time_off: Duration::ZERO,
            },
            BatteryBand::Danger => LedPattern {
                led: Led::Red,
                time_on: BLINK_INTERVAL,
                time_off: BLINK_INTERVAL,
            },
            BatteryBand::Critical => LedPattern {
                led: Led::Red,
                time_on: FAST_INTERVAL,
                time_off: FAST_INTERVAL,
            },
        }
    }
}

/// Reconstruct the battery voltage from a raw ADC value through the
/// resistive divider.
pub fn reading(adc_raw: u16) -> BatteryReading {
    let input_voltage = adc_raw as f32 / ADC_MAX * ADC_REF_VOLTAGE;
    let battery_voltage = input_voltage * (FIRST_RESISTOR + SECOND_RESISTOR) / SECOND_RESISTOR;
    let fraction = (battery_voltage - MIN_BATTERY) / (MAX_BATTERY - MIN_BATTERY);
    BatteryReading {
        adc_raw,
        input_voltage,
        battery_voltage,
        fraction,
    }
}

/// Total, non-overlapping band partition with half-open boundaries; each
/// boundary value belongs to the less urgent band, matching the original
/// first-match evaluation order.
pub fn band(fraction: f32) -> BatteryBand {
    if fraction >= SAFE_FRACTION {
        BatteryBand::Safe
    } else if fraction >= MIDDLE_FRACTION {
        BatteryBand::Middle
    } else if fraction >= DANGER_FRACTION {
        BatteryBand::Danger
    } else {
        BatteryBand::Critical
    }
}

/// Checked independently of the bands and before them.
pub fn should_shutdown(fraction: f32) -> bool {
    fraction < MIN_FRACTION
}

/// Result of evaluating one ADC sample.
#[derive(Clone, Copy, Debug)]
pub struct Sample {
    pub reading: BatteryReading,
    pub band: BatteryBand,
    pub pattern: LedPattern,
    pub should_shutdown: bool,
}

pub fn sample(adc_raw: u16) -> Sample {
    let reading = reading(adc_raw);
    let band = band(reading.fraction);
    Sample {
        reading,
        band,
        pattern: band.pattern(),
        should_shutdown: should_shutdown(reading.fraction),
    }
}

/// Full blink cycles that fit into one polling interval.
pub fn blink_cycles(poll_interval: Duration, pattern: LedPattern) -> u32 {
    let period = pattern.time_on + pattern.time_off;
    if period.is_zero() {
        return 0;
    }
    (poll_interval.as_secs_f64() / period.as_secs_f64()) as u32
}

/// Analog-to-digital converter handle, range `0..=ADC_MAX`.
pub trait Adc {
    fn read(&mut self) -> Result<u16>;
}

/// The two status LEDs, exclusively owned by the monitor.
pub trait StatusLeds {
    fn set(&mut self, led: Led, on: bool) -> Result<()>;
}

/// OS-level power actions taken when the battery is critically low.
pub trait PowerControl {
    fn broadcast(&mut self, message: &str) -> Result<()>;
    fn shutdown(&mut self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// External stop signal observed between samples.
    Stopped,
    /// Low-battery shutdown sequence completed; terminal, never resampled.
    ShutdownTriggered,
}

/// Long-running battery monitor owning the ADC, the LEDs, and the power
/// capability for its lifetime.
pub struct BatteryMonitor<A, L, P> {
    adc: A,
    leds: L,
    power: P,
    poll_interval: Duration,
    shutdown_delay: Duration,
}

impl<A: Adc, L: StatusLeds, P: PowerControl> BatteryMonitor<A, L, P> {
    pub fn new(adc: A, leds: L, power: P) -> Self {
        Self {
            adc,
            leds,
            power,
            poll_interval: LED_POLL_INTERVAL,
            shutdown_delay: SHUTDOWN_DELAY,
        }
    }

    /// Override the blocking intervals (tests run with zero durations).
    pub fn with_timing(mut self, poll_interval: Duration, shutdown_delay: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.shutdown_delay = shutdown_delay;
        self
    }

    pub fn run(&mut self, running: &AtomicBool) -> Result<MonitorOutcome> {
        self.leds.set(Led::Red, false)?;
        self.leds.set(Led::Green, false)?;

        while running.load(Ordering::Relaxed) {
            let sample = sample(self.adc.read()?);
            info!(
                "adc {} input {:.3}V battery {:.3}V fraction {:.3} band {:?}",
                sample.reading.adc_raw,
                sample.reading.input_voltage,
                sample.reading.battery_voltage,
                sample.reading.fraction,
                sample.band,
            );

            if sample.should_shutdown {
                warn!(
                    "low battery ({:.3}V), entering shutdown sequence",
                    sample.reading.battery_voltage
                );
                self.power.broadcast(&format!(
                    "System shutting down in {} seconds",
                    self.shutdown_delay.as_secs()
                ))?;
                thread::sleep(self.shutdown_delay);
                self.leds.set(Led::Red, false)?;
                self.leds.set(Led::Green, false)?;
                self.power.shutdown()?;
                return Ok(MonitorOutcome::ShutdownTriggered);
            }

            self.apply_pattern(sample.pattern)?;
        }

        Ok(MonitorOutcome::Stopped)
    }

    /// Drive one polling interval's worth of LED behaviour. Blocks for the
    /// whole interval.
    fn apply_pattern(&mut self, pattern: LedPattern) -> Result<()> {
        let other = match pattern.led {
            Led::Red => Led::Green,
            Led::Green => Led::Red,
        };
        self.leds.set(other, false)?;

        if pattern.is_solid() {
            self.leds.set(pattern.led, true)?;
            thread::sleep(self.poll_interval);
        } else {
            for _ in 0..blink_cycles(self.poll_interval, pattern) {
                self.leds.set(pattern.led, true)?;
                thread::sleep(pattern.time_on);
                self.leds.set(pattern.led, false)?;
                thread::sleep(pattern.time_off);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct FixedAdc {
        value: u16,
        stop_after: usize,
        reads: usize,
        running: &'static AtomicBool,
    }

    impl Adc for FixedAdc {
        fn read(&mut self) -> Result<u16> {
            self.reads += 1;
            if self.reads >= self.stop_after {
                self.running.store(false, Ordering::SeqCst);
            }
            Ok(self.value)
        }
    }

    #[derive(Default)]
    struct RecordingLeds {
        states: Vec<(Led, bool)>,
    }

    impl StatusLeds for RecordingLeds {
        fn set(&mut self, led: Led, on: bool) -> Result<()> {
            self.states.push((led, on));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingPower {
        broadcasts: usize,
        shutdowns: usize,
    }

    impl PowerControl for RecordingPower {
        fn broadcast(&mut self, _message: &str) -> Result<()> {
            self.broadcasts += 1;
            Ok(())
        }
        fn shutdown(&mut self) -> Result<()> {
            self.shutdowns += 1;
            Ok(())
        }
    }

    fn leak_flag(value: bool) -> &'static AtomicBool {
        Box::leak(Box::new(AtomicBool::new(value)))
    }

    /// Raw ADC value reconstructing approximately the given battery voltage.
    fn adc_for_voltage(battery_voltage: f32) -> u16 {
        let input = battery_voltage * SECOND_RESISTOR / (FIRST_RESISTOR + SECOND_RESISTOR);
        (input / ADC_REF_VOLTAGE * ADC_MAX).round() as u16
    }

    #[test]
    fn full_battery_maps_to_safe_green_solid() {
        let sample = sample(adc_for_voltage(MAX_BATTERY));
        assert!((sample.reading.fraction - 1.0).abs() < 0.01);
        assert_eq!(sample.band, BatteryBand::Safe);
        assert_eq!(sample.pattern.led, Led::Green);
        assert!(sample.pattern.is_solid());
        assert!(!sample.should_shutdown);
    }

    #[test]
    fn min_battery_is_below_the_shutdown_floor() {
        let sample = sample(adc_for_voltage(MIN_BATTERY));
        assert!(sample.reading.fraction.abs() < 0.01);
        assert!(sample.should_shutdown);
    }

    #[test]
    fn band_boundaries_are_half_open() {
        assert_eq!(band(SAFE_FRACTION), BatteryBand::Safe);
        assert_eq!(band(SAFE_FRACTION - 0.001), BatteryBand::Middle);
        assert_eq!(band(MIDDLE_FRACTION), BatteryBand::Middle);
        assert_eq!(band(MIDDLE_FRACTION - 0.001), BatteryBand::Danger);
        assert_eq!(band(DANGER_FRACTION), BatteryBand::Danger);
        assert_eq!(band(DANGER_FRACTION - 0.001), BatteryBand::Critical);
    }

    #[test]
    fn danger_and_critical_blink_at_their_periods() {
        assert_eq!(
            BatteryBand::Danger.pattern().time_on,
            Duration::from_secs(1)
        );
        assert_eq!(
            BatteryBand::Critical.pattern().time_on,
            Duration::from_millis(500)
        );
        assert_eq!(
            blink_cycles(LED_POLL_INTERVAL, BatteryBand::Danger.pattern()),
            15
        );
        assert_eq!(
            blink_cycles(LED_POLL_INTERVAL, BatteryBand::Critical.pattern()),
            30
        );
    }

    #[test]
    fn dead_battery_enters_shutdown_exactly_once() {
        let running = leak_flag(true);
        let mut monitor = BatteryMonitor::new(
            FixedAdc {
                value: 0,
                stop_after: usize::MAX,
                reads: 0,
                running,
            },
            RecordingLeds::default(),
            RecordingPower::default(),
        )
        .with_timing(Duration::ZERO, Duration::ZERO);

        let outcome = monitor.run(running).unwrap();
        assert_eq!(outcome, MonitorOutcome::ShutdownTriggered);
        assert_eq!(monitor.power.broadcasts, 1);
        assert_eq!(monitor.power.shutdowns, 1);
        // Terminal state: the loop returned instead of resampling.
        assert_eq!(monitor.adc.reads, 1);
    }

    #[test]
    fn safe_battery_holds_green_until_stopped() {
        let running = leak_flag(true);
        let mut monitor = BatteryMonitor::new(
            FixedAdc {
                value: adc_for_voltage(MAX_BATTERY),
                stop_after: 3,
                reads: 0,
                running,
            },
            RecordingLeds::default(),
            RecordingPower::default(),
        )
        .with_timing(Duration::ZERO, Duration::ZERO);

        let outcome = monitor.run(running).unwrap();
        assert_eq!(outcome, MonitorOutcome::Stopped);
        assert_eq!(monitor.power.shutdowns, 0);
        assert!(monitor.leds.states.contains(&(Led::Green, true)));
        assert!(!monitor.leds.states.contains(&(Led::Red, true)));
    }
}
