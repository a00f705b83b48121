use crate::binding::Strategy;
use crate::gpio::{Gpio, Level, Mode, Pin};
use crate::poll::timing::{wait_for, TimingError};
use crate::poll::{Sample, Sampler};

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub interval_ms: u64,
    /// Highest number of reads while the capacitor charges
    pub max_count: u16,
    /// Time the capacitor is shorted to ground before every measurement
    pub discharge_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            max_count: u16::MAX,
            discharge_ms: 100,
        }
    }
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Light level of an LDR in series with a capacitor
///
/// The capacitor is discharged through the pin, then the number of reads until the pin
/// shows high again is the charge time. Darker means a higher count.
#[derive(Debug, Clone, Default)]
pub struct Rc {
    config: Config,
}

impl Rc {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl Sampler for Rc {
    fn strategy(&self) -> Strategy {
        Strategy::Ldr
    }

    fn interval(&self) -> Duration {
        self.config.interval()
    }

    fn sample(&self, gpio: &dyn Gpio, pin: Pin) -> Result<Sample, TimingError> {
        gpio.set_mode(pin, Mode::Output);
        gpio.write(pin, Level::Low);
        std::thread::sleep(Duration::from_millis(self.config.discharge_ms));
        gpio.set_mode(pin, Mode::Input);

        let count = wait_for(gpio, pin, Level::High, self.config.max_count as u32)?;
        Ok(Sample::Count(count as u16))
    }
}
