//! Pin level hardware access.
//!
//! Every piece of the server that touches a physical line goes through the [`Gpio`] trait. The
//! backend is chosen once at startup with [`open`] and shared as `Arc<dyn Gpio>` afterwards.

#[cfg(target_os = "linux")]
pub mod bcm2835;
#[cfg(test)]
pub mod scripted;
pub mod simulated;

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;

/// BCM GPIO line number
pub type Pin = u8;

/// Highest line number of the BCM283x GPIO bank
pub const MAX_PIN: Pin = 53;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Input,
    Output,
    Clock,
    Pwm,
    Spi,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }

    pub fn opposite(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value {
            Level::High
        } else {
            Level::Low
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    #[default]
    Off,
    Down,
    Up,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    None,
    Rise,
    Fall,
    Any,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Bcm2835,
    Simulated,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(target_os = "linux") {
            Backend::Bcm2835
        } else {
            Backend::Simulated
        }
    }
}

impl Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Bcm2835 => f.write_str("bcm2835"),
            Backend::Simulated => f.write_str("simulated"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("gpio backend {0} is not available on this platform")]
    Unsupported(Backend),
    #[error("failed to map gpio memory: {0}")]
    Map(#[from] std::io::Error),
}

/// Capability set of a GPIO backend.
///
/// Operations on pins the backend cannot drive (for example PWM on a line without a PWM
/// channel) are ignored by the backend, the same way the hardware would ignore them.
pub trait Gpio: Send + Sync {
    fn set_mode(&self, pin: Pin, mode: Mode);

    fn write(&self, pin: Pin, level: Level);

    fn read(&self, pin: Pin) -> Level;

    fn toggle(&self, pin: Pin) {
        let level = self.read(pin);
        self.write(pin, level.opposite());
    }

    fn set_pull(&self, pin: Pin, pull: Pull);

    fn detect_edge(&self, pin: Pin, edge: Edge);

    /// Returns whether the configured edge occurred since the last call and clears the flag
    fn edge_detected(&self, pin: Pin) -> bool;

    fn set_frequency(&self, pin: Pin, hz: u32);

    fn set_duty_cycle(&self, pin: Pin, duty: u32, cycle: u32);

    /// End the hardware session
    fn close(&self) -> Result<(), GpioError>;
}

/// Open the hardware session of the given backend
pub fn open(backend: Backend) -> Result<Arc<dyn Gpio>, GpioError> {
    tracing::info!(%backend, "opening gpio session");
    match backend {
        #[cfg(target_os = "linux")]
        Backend::Bcm2835 => Ok(Arc::new(bcm2835::Bcm2835::open()?)),
        #[cfg(not(target_os = "linux"))]
        Backend::Bcm2835 => Err(GpioError::Unsupported(backend)),
        Backend::Simulated => Ok(Arc::new(simulated::Simulated::new())),
    }
}
