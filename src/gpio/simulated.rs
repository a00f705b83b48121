use crate::gpio::{Edge, Gpio, GpioError, Level, Mode, Pin, Pull};

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Last known configuration and level of a simulated line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinState {
    pub mode: Mode,
    pub level: Level,
    pub pull: Pull,
    pub edge: Edge,
    pub edge_flag: bool,
    pub frequency: u32,
    pub duty: u32,
    pub cycle: u32,
}

impl Default for PinState {
    fn default() -> Self {
        Self {
            mode: Mode::Input,
            level: Level::Low,
            pull: Pull::Off,
            edge: Edge::None,
            edge_flag: false,
            frequency: 0,
            duty: 0,
            cycle: 0,
        }
    }
}

/// Backend without hardware access
///
/// Every call is logged on debug level and the resulting line state is kept in memory, which
/// makes the backend usable on development machines and in tests. Input lines stay at the level
/// set by their pull resistor until [`Simulated::drive`] changes them.
#[derive(Debug, Default)]
pub struct Simulated {
    pins: Mutex<HashMap<Pin, PinState>>,
}

impl Simulated {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the given line
    #[cfg(test)]
    pub fn state(&self, pin: Pin) -> PinState {
        self.with_pin(pin, |state| *state)
    }

    /// Drive the line from the outside, as a connected sensor or switch would
    #[cfg(test)]
    pub fn drive(&self, pin: Pin, level: Level) {
        self.with_pin(pin, |state| {
            let rising = state.level == Level::Low && level == Level::High;
            let falling = state.level == Level::High && level == Level::Low;
            state.edge_flag |= match state.edge {
                Edge::None => false,
                Edge::Rise => rising,
                Edge::Fall => falling,
                Edge::Any => rising || falling,
            };
            state.level = level;
        });
    }

    fn with_pin<T>(&self, pin: Pin, f: impl FnOnce(&mut PinState) -> T) -> T {
        let mut pins = match self.pins.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(pins.entry(pin).or_default())
    }
}

impl Gpio for Simulated {
    fn set_mode(&self, pin: Pin, mode: Mode) {
        debug!(pin, ?mode, "set_mode");
        self.with_pin(pin, |state| state.mode = mode);
    }

    fn write(&self, pin: Pin, level: Level) {
        debug!(pin, ?level, "write");
        self.with_pin(pin, |state| state.level = level);
    }

    fn read(&self, pin: Pin) -> Level {
        let level = self.with_pin(pin, |state| state.level);
        debug!(pin, ?level, "read");
        level
    }

    fn set_pull(&self, pin: Pin, pull: Pull) {
        debug!(pin, ?pull, "set_pull");
        self.with_pin(pin, |state| {
            state.pull = pull;
            if state.mode == Mode::Input {
                match pull {
                    Pull::Up => state.level = Level::High,
                    Pull::Down => state.level = Level::Low,
                    Pull::Off => {}
                }
            }
        });
    }

    fn detect_edge(&self, pin: Pin, edge: Edge) {
        debug!(pin, ?edge, "detect_edge");
        self.with_pin(pin, |state| {
            state.edge = edge;
            state.edge_flag = false;
        });
    }

    fn edge_detected(&self, pin: Pin) -> bool {
        let detected = self.with_pin(pin, |state| std::mem::take(&mut state.edge_flag));
        debug!(pin, detected, "edge_detected");
        detected
    }

    fn set_frequency(&self, pin: Pin, hz: u32) {
        debug!(pin, hz, "set_frequency");
        self.with_pin(pin, |state| state.frequency = hz);
    }

    fn set_duty_cycle(&self, pin: Pin, duty: u32, cycle: u32) {
        debug!(pin, duty, cycle, "set_duty_cycle");
        self.with_pin(pin, |state| {
            state.duty = duty;
            state.cycle = cycle;
        });
    }

    fn close(&self) -> Result<(), GpioError> {
        debug!("close");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Simulated;
    use crate::gpio::{Edge, Gpio, Level, Mode, Pull};

    #[test]
    fn ut_simulated_output() {
        let gpio = Simulated::new();
        gpio.set_mode(18, Mode::Pwm);
        gpio.set_frequency(18, 10_000);
        gpio.set_duty_cycle(18, 25, 100);
        let state = gpio.state(18);
        assert_eq!(state.mode, Mode::Pwm);
        assert_eq!(state.frequency, 10_000);
        assert_eq!((state.duty, state.cycle), (25, 100));
    }

    #[test]
    fn ut_simulated_pull() {
        let gpio = Simulated::new();
        gpio.set_mode(4, Mode::Input);
        gpio.set_pull(4, Pull::Up);
        assert_eq!(gpio.read(4), Level::High);
        gpio.set_pull(4, Pull::Down);
        assert_eq!(gpio.read(4), Level::Low);
    }

    #[test]
    fn ut_simulated_edge() {
        let gpio = Simulated::new();
        gpio.set_mode(7, Mode::Input);
        gpio.detect_edge(7, Edge::Fall);
        gpio.drive(7, Level::High);
        assert!(!gpio.edge_detected(7));
        gpio.drive(7, Level::Low);
        assert!(gpio.edge_detected(7));
        assert!(!gpio.edge_detected(7));

        gpio.detect_edge(7, Edge::Any);
        gpio.drive(7, Level::High);
        assert!(gpio.edge_detected(7));
    }
}
