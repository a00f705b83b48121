use crate::binding::Strategy;
use crate::gpio::{Backend, Pin, Pull, MAX_PIN};
use crate::net::rtu::Config as RtuConfig;
use crate::poll::{dht22, digital, rc};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const DEFAULT_LISTEN_ON: &str = "127.0.0.1:502";
pub const PWM_DEFAULT_FREQ: u32 = 10_000;
pub const PWM_DEFAULT_CYCLE: u32 = 100;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("input address {0} is configured more than once")]
    DuplicateInput(u16),
    #[error("output address {0} is configured more than once")]
    DuplicateOutput(u16),
    #[error("pin {0} does not exist (highest pin is {MAX_PIN})")]
    InvalidPin(Pin),
    #[error("pwm cycle of output {0} must be within 1..=65535")]
    InvalidCycle(u16),
    #[error("DHT22 input {0} needs the input register {0}+1 for its temperature")]
    Dht22Companion(u16),
    #[error("poll interval of {0} must not be zero")]
    ZeroInterval(Strategy),
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct InputPoller {
    #[serde(rename = "type")]
    pub kind: String,
    /// Seed value stored in the input's register before the first sample
    pub value: Option<u16>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Input {
    pub address: u16,
    pub pin: Pin,
    pub pull: Option<Pull>,
    pub poller: Option<InputPoller>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct OutputPwm {
    pub freq: Option<u32>,
    pub cycle: Option<u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Output {
    pub address: u16,
    pub pin: Pin,
    pub pwm: Option<OutputPwm>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct GpioConfig {
    pub backend: Backend,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct PollersConfig {
    #[serde(rename = "PB")]
    pub pb: digital::Config,
    #[serde(rename = "LDR")]
    pub ldr: rc::Config,
    #[serde(rename = "DHT22")]
    pub dht22: dht22::Config,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub listen_on: String,
    pub gpio: GpioConfig,
    pub rtu: RtuConfig,
    pub pollers: PollersConfig,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_on: crate::util::str!(DEFAULT_LISTEN_ON),
            gpio: GpioConfig::default(),
            rtu: RtuConfig::default(),
            pollers: PollersConfig::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Read configuration from file, JSON if the file ends with `.json`, TOML otherwise
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("failed to decode {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("failed to decode {}", path.display()))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that do not depend on the poller classification
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (strategy, interval_ms) in [
            (Strategy::Pb, self.pollers.pb.interval_ms),
            (Strategy::Ldr, self.pollers.ldr.interval_ms),
            (Strategy::Dht22, self.pollers.dht22.interval_ms),
        ] {
            if interval_ms == 0 {
                return Err(ConfigError::ZeroInterval(strategy));
            }
        }

        let mut seen = HashSet::new();
        for input in &self.inputs {
            if !seen.insert(input.address) {
                return Err(ConfigError::DuplicateInput(input.address));
            }
            if input.pin > MAX_PIN {
                return Err(ConfigError::InvalidPin(input.pin));
            }
        }

        let mut seen = HashSet::new();
        for output in &self.outputs {
            if !seen.insert(output.address) {
                return Err(ConfigError::DuplicateOutput(output.address));
            }
            if output.pin > MAX_PIN {
                return Err(ConfigError::InvalidPin(output.pin));
            }
            let cycle = output
                .pwm
                .as_ref()
                .and_then(|pwm| pwm.cycle)
                .unwrap_or(PWM_DEFAULT_CYCLE);
            if cycle == 0 || cycle > u16::MAX as u32 {
                return Err(ConfigError::InvalidCycle(output.address));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, ConfigError, Output, OutputPwm};
    use crate::binding::Strategy;
    use crate::gpio::{Backend, Pull};
    use std::io::Write;
    use std::time::Duration;

    const TOML: &str = r#"
listen_on = "0.0.0.0:1502"

[gpio]
backend = "simulated"

[rtu]
enabled = true
path = "/dev/ttyUSB0"

[pollers.LDR]
max_count = 1000

[[inputs]]
address = 3
pin = 17
pull = "up"

[[inputs]]
address = 4
pin = 27
poller = { type = "DHT22" }

[[outputs]]
address = 0
pin = 18
pwm = { cycle = 255 }

[[outputs]]
address = 1
pin = 23
"#;

    #[test]
    fn ut_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.listen_on, "127.0.0.1:502");
        assert!(!config.rtu.enabled);
        assert_eq!(config.rtu.path, "/dev/ttyS0");
        assert_eq!(config.rtu.baud_rate, 19200);
        assert_eq!(config.rtu.data_bits, 8);
        assert_eq!(config.rtu.stop_bits, 1);
        assert_eq!(config.rtu.parity, "E");
        assert_eq!(config.pollers.pb.interval(), Duration::from_secs(10));
        assert_eq!(config.pollers.ldr.max_count, 65535);
        assert_eq!(config.pollers.dht22.interval(), Duration::from_secs(60));
        assert_eq!(config.pollers.dht22.max_count, 32000);
    }

    #[test]
    fn ut_read_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(TOML.as_bytes()).unwrap();

        let config = AppConfig::read(file.path()).unwrap();
        assert_eq!(config.listen_on, "0.0.0.0:1502");
        assert_eq!(config.gpio.backend, Backend::Simulated);
        assert!(config.rtu.enabled);
        assert_eq!(config.rtu.path, "/dev/ttyUSB0");
        assert_eq!(config.rtu.baud_rate, 19200);
        assert_eq!(config.pollers.ldr.max_count, 1000);
        assert_eq!(config.pollers.ldr.interval(), Duration::from_secs(10));
        assert_eq!(config.inputs.len(), 2);
        assert_eq!(config.inputs[0].pull, Some(Pull::Up));
        assert_eq!(config.inputs[1].poller.as_ref().unwrap().kind, "DHT22");
        assert_eq!(config.outputs[0].pwm.as_ref().unwrap().cycle, Some(255));
        assert!(config.outputs[1].pwm.is_none());
    }

    #[test]
    fn ut_read_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(
            br#"{ "outputs": [ { "address": 2, "pin": 12, "pwm": { "freq": 500 } } ] }"#,
        )
        .unwrap();

        let config = AppConfig::read(file.path()).unwrap();
        assert_eq!(config.listen_on, "127.0.0.1:502");
        assert_eq!(config.outputs[0].pwm.as_ref().unwrap().freq, Some(500));
    }

    #[test]
    fn ut_read_missing() {
        assert!(AppConfig::read(std::path::Path::new("/nonexistent/mbpio.toml")).is_err());
    }

    #[test]
    fn ut_validate() {
        let output = |address, pin, cycle: Option<u32>| Output {
            address,
            pin,
            pwm: cycle.map(|c| OutputPwm {
                freq: None,
                cycle: Some(c),
            }),
        };

        let mut config = AppConfig::default();
        config.outputs = vec![output(1, 18, None), output(1, 19, None)];
        assert_eq!(config.validate(), Err(ConfigError::DuplicateOutput(1)));

        config.outputs = vec![output(1, 60, None)];
        assert_eq!(config.validate(), Err(ConfigError::InvalidPin(60)));

        config.outputs = vec![output(1, 18, Some(0))];
        assert_eq!(config.validate(), Err(ConfigError::InvalidCycle(1)));

        config.outputs = vec![output(1, 18, Some(70_000))];
        assert_eq!(config.validate(), Err(ConfigError::InvalidCycle(1)));

        config.outputs = vec![output(1, 18, Some(1024)), output(2, 23, None)];
        assert_eq!(config.validate(), Ok(()));

        config.pollers.ldr.interval_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroInterval(Strategy::Ldr)));
    }

    #[test]
    fn ut_read_zero_interval() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(
            b"[pollers.PB]\ninterval_ms = 0\n\n[[inputs]]\naddress = 3\npin = 5\npoller = { type = \"PB\" }\n",
        )
        .unwrap();

        let err = AppConfig::read(file.path()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::ZeroInterval(Strategy::Pb))
        );
    }
}
