use crate::binding::Strategy;
use crate::gpio::{Gpio, Level, Mode, Pin};
use crate::poll::timing::{time_pulse, TimingError};
use crate::poll::{Sample, Sampler};

use serde::{Deserialize, Serialize};
use std::thread::sleep;
use std::time::Duration;

/// Response pulse of the sensor followed by 40 data bits
const PULSES: usize = 41;
const DATA_BITS: usize = 40;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub interval_ms: u64,
    /// Highest number of reads per edge
    pub max_count: u32,
    /// High pulses longer than this are ones
    pub threshold_us: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            max_count: 32_000,
            threshold_us: 50,
        }
    }
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// DHT22 (AM2302) humidity and temperature sensor on a single data line
#[derive(Debug, Clone, Default)]
pub struct Dht22 {
    config: Config,
}

impl Dht22 {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Send the start signal and measure all high pulses of the answer
    fn read_pulses(&self, gpio: &dyn Gpio, pin: Pin) -> Result<Vec<Duration>, TimingError> {
        gpio.set_mode(pin, Mode::Output);
        gpio.write(pin, Level::High);
        sleep(Duration::from_millis(250));
        gpio.write(pin, Level::Low);
        sleep(Duration::from_millis(5));
        gpio.write(pin, Level::High);
        sleep(Duration::from_micros(20));
        gpio.set_mode(pin, Mode::Input);

        (0..PULSES)
            .map(|_| time_pulse(gpio, pin, Level::High, self.config.max_count))
            .collect()
    }
}

/// Decode the 40 data pulses into humidity and temperature, both in tenths
///
/// The temperature is returned in two's complement.
pub fn decode(pulses: &[Duration], threshold: Duration) -> Result<(u16, u16), TimingError> {
    if pulses.len() != DATA_BITS {
        return Err(TimingError::Incomplete {
            expected: DATA_BITS,
            actual: pulses.len(),
        });
    }

    let mut bytes = [0u8; 5];
    for (i, pulse) in pulses.iter().enumerate() {
        if *pulse > threshold {
            bytes[i / 8] |= 0x80 >> (i % 8);
        }
    }

    let expected = bytes[..4].iter().fold(0u8, |sum, b| sum.wrapping_add(*b));
    if expected != bytes[4] {
        return Err(TimingError::Checksum {
            expected,
            actual: bytes[4],
        });
    }

    let humidity = u16::from_be_bytes([bytes[0], bytes[1]]);
    let magnitude = u16::from_be_bytes([bytes[2] & 0x7F, bytes[3]]) as i16;
    let temperature = if bytes[2] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };
    Ok((humidity, temperature as u16))
}

impl Sampler for Dht22 {
    fn strategy(&self) -> Strategy {
        Strategy::Dht22
    }

    fn interval(&self) -> Duration {
        self.config.interval()
    }

    fn sample(&self, gpio: &dyn Gpio, pin: Pin) -> Result<Sample, TimingError> {
        let pulses = self.read_pulses(gpio, pin)?;
        let (humidity, temperature) = decode(
            &pulses[1..],
            Duration::from_micros(self.config.threshold_us),
        )?;
        Ok(Sample::Climate {
            humidity,
            temperature,
        })
    }
}
