//! Address to hardware mapping computed once at startup.

use crate::config::{AppConfig, ConfigError, PWM_DEFAULT_CYCLE, PWM_DEFAULT_FREQ};
use crate::gpio::{Gpio, Level, Mode, Pin};
use crate::mem::{Bits, RegisterBank, Words};

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, warn};

/// Named sampling strategies an input can be bound to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strategy {
    /// Digital refresh of push buttons and switches
    Pb,
    /// RC discharge timing of a light dependent resistor
    Ldr,
    /// Pulse width protocol of a DHT22 humidity and temperature sensor
    Dht22,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::Pb, Strategy::Ldr, Strategy::Dht22];
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PB" => Ok(Strategy::Pb),
            "LDR" => Ok(Strategy::Ldr),
            "DHT22" => Ok(Strategy::Dht22),
            _ => Err(format!("unknown poller type {s}")),
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Pb => f.write_str("PB"),
            Strategy::Ldr => f.write_str("LDR"),
            Strategy::Dht22 => f.write_str("DHT22"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoBinding {
    DigitalOutput { pin: Pin },
    PwmOutput { pin: Pin, frequency: u32, cycle: u16 },
    DigitalInput { pin: Pin },
    PolledInput { pin: Pin, strategy: Strategy },
}

/// One address sampled by a poller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target {
    pub addr: u16,
    pub pin: Pin,
}

impl IoBinding {
    /// Drive the output as a coil. PWM outputs run at full or zero duty.
    ///
    /// Returns `false` without touching the pin if the binding is not an output.
    pub fn apply_coil(&self, gpio: &dyn Gpio, on: bool) -> bool {
        match *self {
            IoBinding::DigitalOutput { pin } => {
                gpio.write(pin, Level::from(on));
                true
            }
            IoBinding::PwmOutput { pin, cycle, .. } => {
                let duty = if on { cycle as u32 } else { 0 };
                gpio.set_duty_cycle(pin, duty, cycle as u32);
                true
            }
            _ => false,
        }
    }

    /// Apply `value` clamped to the cycle length as duty of a PWM output
    ///
    /// Returns the applied duty, or `None` if the binding is not a PWM output.
    pub fn apply_duty(&self, gpio: &dyn Gpio, value: u16) -> Option<u16> {
        match *self {
            IoBinding::PwmOutput { pin, cycle, .. } => {
                let duty = std::cmp::min(value, cycle);
                gpio.set_duty_cycle(pin, duty as u32, cycle as u32);
                Some(duty)
            }
            _ => None,
        }
    }

    pub fn is_pwm(&self) -> bool {
        matches!(self, IoBinding::PwmOutput { .. })
    }
}

/// Read-only after construction, shared between handlers and pollers without a lock
#[derive(Debug, Default)]
pub struct BindingTable {
    outputs: HashMap<u16, IoBinding>,
    inputs: HashMap<u16, IoBinding>,
}

impl BindingTable {
    /// Classify the configured inputs and outputs and put the pins into their initial state
    ///
    /// Seed values of inputs are written into `bank`.
    pub fn build(
        config: &AppConfig,
        gpio: &dyn Gpio,
        bank: &mut RegisterBank,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut table = Self::default();

        for output in &config.outputs {
            let binding = match &output.pwm {
                Some(pwm) => {
                    let frequency = pwm.freq.unwrap_or(PWM_DEFAULT_FREQ);
                    let cycle = pwm.cycle.unwrap_or(PWM_DEFAULT_CYCLE) as u16;
                    debug!(addr = output.address, pin = output.pin, frequency, duty = 0, cycle, "registering pwm output");
                    gpio.set_mode(output.pin, Mode::Pwm);
                    gpio.set_frequency(output.pin, frequency);
                    gpio.set_duty_cycle(output.pin, 0, cycle as u32);
                    IoBinding::PwmOutput {
                        pin: output.pin,
                        frequency,
                        cycle,
                    }
                }
                None => {
                    debug!(addr = output.address, pin = output.pin, "registering digital output");
                    gpio.set_mode(output.pin, Mode::Output);
                    gpio.write(output.pin, Level::Low);
                    IoBinding::DigitalOutput { pin: output.pin }
                }
            };
            table.outputs.insert(output.address, binding);
        }

        for input in &config.inputs {
            let strategy = input.poller.as_ref().and_then(|poller| {
                poller
                    .kind
                    .parse::<Strategy>()
                    .map_err(|e| warn!(addr = input.address, "{e}, using a digital input"))
                    .ok()
            });
            let seed = input.poller.as_ref().and_then(|poller| poller.value);

            let binding = match strategy {
                Some(strategy) => {
                    debug!(addr = input.address, pin = input.pin, %strategy, ?seed, "registering polled input");
                    IoBinding::PolledInput {
                        pin: input.pin,
                        strategy,
                    }
                }
                None => {
                    debug!(addr = input.address, pin = input.pin, "registering digital input");
                    gpio.set_mode(input.pin, Mode::Input);
                    IoBinding::DigitalInput { pin: input.pin }
                }
            };
            if let Some(pull) = input.pull {
                gpio.set_pull(input.pin, pull);
            }
            if let Some(value) = seed {
                match strategy {
                    Some(Strategy::Ldr) | Some(Strategy::Dht22) => {
                        bank.set_word(Words::InputRegisters, input.address, value)
                    }
                    _ => bank.set_bit(Bits::DiscreteInputs, input.address, value != 0),
                }
            }
            table.inputs.insert(input.address, binding);
        }

        // The temperature of a DHT22 lives in the register after its humidity
        for target in table.targets(Strategy::Dht22) {
            let companion = target
                .addr
                .checked_add(1)
                .ok_or(ConfigError::Dht22Companion(target.addr))?;
            if let Some(IoBinding::PolledInput { strategy, .. }) = table.input(companion) {
                if *strategy != Strategy::Pb {
                    return Err(ConfigError::Dht22Companion(target.addr));
                }
            }
        }

        Ok(table)
    }

    pub fn output(&self, addr: u16) -> Option<&IoBinding> {
        self.outputs.get(&addr)
    }

    pub fn input(&self, addr: u16) -> Option<&IoBinding> {
        self.inputs.get(&addr)
    }

    /// Unpolled digital inputs within `[addr, addr + count)`
    pub fn digital_inputs(&self, addr: u16, count: u16) -> Vec<Target> {
        let range = addr as usize..addr as usize + count as usize;
        self.inputs
            .iter()
            .filter(|(a, _)| range.contains(&(**a as usize)))
            .filter_map(|(a, binding)| match binding {
                IoBinding::DigitalInput { pin } => Some(Target { addr: *a, pin: *pin }),
                _ => None,
            })
            .collect()
    }

    /// Addresses bound to the given strategy, in ascending address order
    pub fn targets(&self, strategy: Strategy) -> Vec<Target> {
        let mut targets: Vec<Target> = self
            .inputs
            .iter()
            .filter_map(|(addr, binding)| match binding {
                IoBinding::PolledInput { pin, strategy: s } if *s == strategy => {
                    Some(Target { addr: *addr, pin: *pin })
                }
                _ => None,
            })
            .collect();
        targets.sort_by_key(|t| t.addr);
        targets
    }
}
