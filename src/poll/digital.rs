use crate::binding::Strategy;
use crate::gpio::{Gpio, Mode, Pin};
use crate::poll::timing::TimingError;
use crate::poll::{Sample, Sampler};

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
        }
    }
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Periodic copy of push buttons and switches into the discrete inputs
#[derive(Debug, Clone, Default)]
pub struct Digital {
    config: Config,
}

impl Digital {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl Sampler for Digital {
    fn strategy(&self) -> Strategy {
        Strategy::Pb
    }

    fn interval(&self) -> Duration {
        self.config.interval()
    }

    fn sample(&self, gpio: &dyn Gpio, pin: Pin) -> Result<Sample, TimingError> {
        gpio.set_mode(pin, Mode::Input);
        Ok(Sample::Level(gpio.read(pin).is_high()))
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, Digital};
    use crate::gpio::simulated::Simulated;
    use crate::gpio::{Gpio, Level, Pull};
    use crate::poll::{Sample, Sampler};

    #[test]
    fn ut_digital() {
        let gpio = Simulated::new();
        let sampler = Digital::new(Config::default());
        assert_eq!(sampler.sample(&gpio, 5), Ok(Sample::Level(false)));

        gpio.set_pull(5, Pull::Up);
        assert_eq!(sampler.sample(&gpio, 5), Ok(Sample::Level(true)));

        gpio.drive(5, Level::Low);
        assert_eq!(sampler.sample(&gpio, 5), Ok(Sample::Level(false)));
    }
}
