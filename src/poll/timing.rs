//! Bounded busy-wait primitives for bit-banged sensor protocols.
//!
//! All loops read the pin at most `max_count` times per phase and never sleep. They are meant to
//! run on the blocking thread pool.

use crate::gpio::{Gpio, Level, Pin};

use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TimingError {
    #[error("pin {pin} did not reach {level:?} within {max_count} reads")]
    Timeout { pin: Pin, level: Level, max_count: u32 },
    #[error("checksum mismatch, expected {expected:#04x} but got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },
    #[error("expected {expected} pulses but got {actual}")]
    Incomplete { expected: usize, actual: usize },
}

/// Read `pin` until it shows `level`
///
/// Returns the number of reads that saw the other level. Gives up after exactly `max_count`
/// reads.
pub fn wait_for(gpio: &dyn Gpio, pin: Pin, level: Level, max_count: u32) -> Result<u32, TimingError> {
    for count in 0..max_count {
        if gpio.read(pin) == level {
            return Ok(count);
        }
    }
    Err(TimingError::Timeout {
        pin,
        level,
        max_count,
    })
}

/// Measure the next full pulse of `level` on `pin`
///
/// Waits for the opposite level first so a pulse already in progress is not measured, then for
/// the start of the pulse, then times it until the line returns to the opposite level.
pub fn time_pulse(
    gpio: &dyn Gpio,
    pin: Pin,
    level: Level,
    max_count: u32,
) -> Result<Duration, TimingError> {
    let around = level.opposite();
    wait_for(gpio, pin, around, max_count)?;
    wait_for(gpio, pin, level, max_count)?;
    let start = Instant::now();
    wait_for(gpio, pin, around, max_count)?;
    Ok(start.elapsed())
}
