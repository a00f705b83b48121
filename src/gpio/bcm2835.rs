//! Memory mapped register access for the BCM283x/BCM2711 GPIO, clock and PWM peripherals.
//!
//! With access to `/dev/mem` all three peripheral blocks are mapped. Without it the backend falls
//! back to `/dev/gpiomem`, which only exposes the GPIO block: digital I/O, pulls and edge
//! detection keep working, clock and PWM requests are ignored with a warning.

use crate::gpio::{Edge, Gpio, GpioError, Level, Mode, Pin, Pull, MAX_PIN};

use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, warn};

const BCM2835_BASE: u64 = 0x2000_0000;
const BCM2711_BASE: u64 = 0xFE00_0000;

const GPIO_OFFSET: u64 = 0x0020_0000;
const CLK_OFFSET: u64 = 0x0010_1000;
const PWM_OFFSET: u64 = 0x0020_C000;

const BLOCK_SIZE: usize = 4096;

// GPIO block, word offsets
const GPFSEL: usize = 0;
const GPSET: usize = 7;
const GPCLR: usize = 10;
const GPLEV: usize = 13;
const GPEDS: usize = 16;
const GPREN: usize = 19;
const GPFEN: usize = 22;
const GPPUD: usize = 37;
const GPPUDCLK: usize = 38;
const GPIO_PUP_PDN_CNTRL: usize = 57;

// Alternate function selectors
const ALT0: u32 = 0b100;
const ALT4: u32 = 0b011;
const ALT5: u32 = 0b010;

// Clock manager
const CLK_PASSWORD: u32 = 0x5A00_0000;
const CLK_BUSY: u32 = 1 << 7;
const CLK_ENABLE: u32 = 1 << 4;
const CLK_SRC_OSC: u32 = 1;
const CLK_MASH_1: u32 = 1 << 9;
const CLK_DIV_MASK: u32 = 0xFFF;

// PWM block
const PWM_CTL: usize = 0;
const PWM_ENABLE: u32 = 1;
const PWM_MS_MODE: u32 = 1 << 7;
const PWM_CHANNEL_MASK: u32 = 0xFF;
const PWM_ENABLE_BOTH: u32 = PWM_ENABLE | (PWM_ENABLE << 8);

/// One 4 KiB page of peripheral registers
struct Block(MmapMut);

impl Block {
    fn map(file: &File, offset: u64) -> std::io::Result<Self> {
        // SAFETY: the mapping targets device registers, not a file other code could truncate.
        let map = unsafe { MmapOptions::new().offset(offset).len(BLOCK_SIZE).map_mut(file)? };
        Ok(Self(map))
    }

    fn get(&self, reg: usize) -> u32 {
        debug_assert!(reg < BLOCK_SIZE / 4);
        // SAFETY: `reg` lies inside the mapped page and registers are 32 bit aligned.
        unsafe { (self.0.as_ptr() as *const u32).add(reg).read_volatile() }
    }

    fn set(&mut self, reg: usize, value: u32) {
        debug_assert!(reg < BLOCK_SIZE / 4);
        // SAFETY: see `get`.
        unsafe { (self.0.as_mut_ptr() as *mut u32).add(reg).write_volatile(value) }
    }
}

pub struct Bcm2835 {
    gpio: Mutex<Block>,
    clk: Option<Mutex<Block>>,
    pwm: Option<Mutex<Block>>,
    bcm2711: bool,
}

/// Physical base address of the peripherals as reported by the device tree
fn peripheral_base() -> u64 {
    let ranges = match std::fs::read("/proc/device-tree/soc/ranges") {
        Ok(v) => v,
        Err(_) => return BCM2835_BASE,
    };
    let word = |at: usize| {
        ranges
            .get(at..at + 4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64)
    };
    match word(4) {
        Some(0) => word(8).unwrap_or(BCM2711_BASE),
        Some(base) => base,
        None => BCM2835_BASE,
    }
}

fn lock(block: &Mutex<Block>) -> MutexGuard<'_, Block> {
    match block.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Integer and fractional clock divider with the matching MASH setting for `hz`
fn divisor(source: u32, hz: u32) -> (u32, u32, u32) {
    let divi = (source / hz) & CLK_DIV_MASK;
    let divf = ((((source % hz) as u64) << 12) / hz as u64) as u32 & CLK_DIV_MASK;
    let mash = if divi < 2 || divf == 0 { 0 } else { CLK_MASH_1 };
    (divi, divf, mash)
}

fn bank(pin: Pin) -> (usize, u32) {
    ((pin / 32) as usize, 1 << (pin % 32))
}

impl Bcm2835 {
    pub fn open() -> Result<Self, GpioError> {
        let base = peripheral_base();
        let bcm2711 = base == BCM2711_BASE;
        debug!(base = %format!("{base:#010X}"), bcm2711, "peripheral base");

        match OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open("/dev/mem")
        {
            Ok(file) => Ok(Self {
                gpio: Mutex::new(Block::map(&file, base + GPIO_OFFSET)?),
                clk: Some(Mutex::new(Block::map(&file, base + CLK_OFFSET)?)),
                pwm: Some(Mutex::new(Block::map(&file, base + PWM_OFFSET)?)),
                bcm2711,
            }),
            Err(e) => {
                warn!("/dev/mem unavailable ({e}), falling back to /dev/gpiomem without clock and pwm");
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .custom_flags(libc::O_SYNC)
                    .open("/dev/gpiomem")?;
                Ok(Self {
                    gpio: Mutex::new(Block::map(&file, 0)?),
                    clk: None,
                    pwm: None,
                    bcm2711,
                })
            }
        }
    }

    fn oscillator_hz(&self) -> u32 {
        if self.bcm2711 {
            54_000_000
        } else {
            19_200_000
        }
    }

    /// Disable both pwm channels, returning the enable bits that were set
    fn pause_pwm(&self) -> u32 {
        let Some(pwm) = &self.pwm else {
            return 0;
        };
        let mut pwm = lock(pwm);
        let ctl = pwm.get(PWM_CTL);
        pwm.set(PWM_CTL, ctl & !PWM_ENABLE_BOTH);
        ctl & PWM_ENABLE_BOTH
    }

    fn resume_pwm(&self, enabled: u32) {
        if let Some(pwm) = &self.pwm {
            let mut pwm = lock(pwm);
            let ctl = pwm.get(PWM_CTL);
            pwm.set(PWM_CTL, ctl | (enabled & PWM_ENABLE_BOTH));
        }
    }
}

impl Gpio for Bcm2835 {
    fn set_mode(&self, pin: Pin, mode: Mode) {
        if pin > MAX_PIN {
            return;
        }
        let function = match mode {
            Mode::Input => 0,
            Mode::Output => 1,
            Mode::Clock => match pin {
                4 | 5 | 6 | 32 | 34 | 42 | 43 | 44 => ALT0,
                20 | 21 => ALT5,
                _ => return warn!(pin, "line has no clock function"),
            },
            Mode::Pwm => match pin {
                12 | 13 | 40 | 41 | 45 => ALT0,
                18 | 19 => ALT5,
                _ => return warn!(pin, "line has no pwm function"),
            },
            Mode::Spi => match pin {
                7..=11 | 35..=39 => ALT0,
                16..=21 | 40..=45 => ALT4,
                _ => return warn!(pin, "line has no spi function"),
            },
        };
        let reg = GPFSEL + (pin / 10) as usize;
        let shift = (pin % 10) as u32 * 3;
        let mut gpio = lock(&self.gpio);
        let value = gpio.get(reg);
        gpio.set(reg, (value & !(0b111 << shift)) | (function << shift));
    }

    fn write(&self, pin: Pin, level: Level) {
        let (bank, bit) = bank(pin);
        let reg = match level {
            Level::High => GPSET,
            Level::Low => GPCLR,
        };
        lock(&self.gpio).set(reg + bank, bit);
    }

    fn read(&self, pin: Pin) -> Level {
        let (bank, bit) = bank(pin);
        Level::from(lock(&self.gpio).get(GPLEV + bank) & bit != 0)
    }

    fn set_pull(&self, pin: Pin, pull: Pull) {
        let mut gpio = lock(&self.gpio);
        if self.bcm2711 {
            let reg = GPIO_PUP_PDN_CNTRL + (pin / 16) as usize;
            let shift = (pin % 16) as u32 * 2;
            let bits = match pull {
                Pull::Off => 0,
                Pull::Up => 1,
                Pull::Down => 2,
            };
            let value = gpio.get(reg);
            gpio.set(reg, (value & !(0b11 << shift)) | (bits << shift));
        } else {
            let (bank, bit) = bank(pin);
            let control = match pull {
                Pull::Off => 0,
                Pull::Down => 1,
                Pull::Up => 2,
            };
            // The control signal needs 150 cycles of setup and hold time
            gpio.set(GPPUD, control);
            sleep(Duration::from_micros(1));
            gpio.set(GPPUDCLK + bank, bit);
            sleep(Duration::from_micros(1));
            gpio.set(GPPUD, 0);
            gpio.set(GPPUDCLK + bank, 0);
        }
    }

    fn detect_edge(&self, pin: Pin, edge: Edge) {
        let (bank, bit) = bank(pin);
        let (rise, fall) = match edge {
            Edge::None => (false, false),
            Edge::Rise => (true, false),
            Edge::Fall => (false, true),
            Edge::Any => (true, true),
        };
        let mut gpio = lock(&self.gpio);
        for (reg, enabled) in [(GPREN + bank, rise), (GPFEN + bank, fall)] {
            let value = gpio.get(reg);
            gpio.set(reg, if enabled { value | bit } else { value & !bit });
        }
        gpio.set(GPEDS + bank, bit);
    }

    fn edge_detected(&self, pin: Pin) -> bool {
        let (bank, bit) = bank(pin);
        let mut gpio = lock(&self.gpio);
        let detected = gpio.get(GPEDS + bank) & bit != 0;
        gpio.set(GPEDS + bank, bit);
        detected
    }

    fn set_frequency(&self, pin: Pin, hz: u32) {
        let Some(clk) = &self.clk else {
            return warn!(pin, hz, "clock manager not mapped, frequency ignored");
        };
        if hz == 0 {
            return warn!(pin, "frequency must be greater than zero");
        }
        let (ctl, div, pwm) = match pin {
            4 | 20 | 32 | 34 => (28, 29, false),
            5 | 21 | 42 | 44 => (30, 31, false),
            6 | 43 => (32, 33, false),
            12 | 13 | 18 | 19 | 40 | 41 | 45 => (40, 41, true),
            _ => return warn!(pin, "line has no clock source"),
        };

        let (divi, divf, mash) = divisor(self.oscillator_hz(), hz);

        // The pwm clock stays busy while a channel is running
        let enabled = if pwm { self.pause_pwm() } else { 0 };
        {
            let mut clk = lock(clk);
            let value = clk.get(ctl);
            clk.set(ctl, CLK_PASSWORD | (value & !CLK_ENABLE));
            while clk.get(ctl) & CLK_BUSY != 0 {
                sleep(Duration::from_micros(10));
            }
            clk.set(ctl, CLK_PASSWORD | mash | CLK_SRC_OSC);
            clk.set(div, CLK_PASSWORD | (divi << 12) | divf);
            sleep(Duration::from_micros(10));
            clk.set(ctl, CLK_PASSWORD | mash | CLK_SRC_OSC | CLK_ENABLE);
        }
        if pwm {
            self.resume_pwm(enabled);
        }
    }

    fn set_duty_cycle(&self, pin: Pin, duty: u32, cycle: u32) {
        let Some(pwm) = &self.pwm else {
            return warn!(pin, duty, cycle, "pwm not mapped, duty cycle ignored");
        };
        let (rng, dat, shift) = match pin {
            12 | 18 | 40 => (4, 5, 0),
            13 | 19 | 41 | 45 => (8, 9, 8),
            _ => return warn!(pin, "line has no pwm channel"),
        };
        let mut pwm = lock(pwm);
        let ctl = pwm.get(PWM_CTL) & !(PWM_CHANNEL_MASK << shift);
        pwm.set(PWM_CTL, ctl | ((PWM_MS_MODE | PWM_ENABLE) << shift));
        pwm.set(dat, duty);
        pwm.set(rng, cycle);
        sleep(Duration::from_micros(10));
    }

    fn close(&self) -> Result<(), GpioError> {
        debug!("closing bcm2835 session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{bank, divisor, CLK_MASH_1};

    #[test]
    fn ut_divisor() {
        assert_eq!(divisor(19_200_000, 10_000), (1920, 0, 0));
        assert_eq!(divisor(54_000_000, 10_000), (5400, 0, 0));
        // 19.2 MHz / 7 MHz = 2 + 5.2 / 7, the fraction in 1/4096 steps
        assert_eq!(divisor(19_200_000, 7_000_000), (2, 3042, CLK_MASH_1));
        assert_eq!(divisor(19_200_000, 19_200_000), (1, 0, 0));
    }

    #[test]
    fn ut_bank() {
        assert_eq!(bank(0), (0, 1));
        assert_eq!(bank(31), (0, 1 << 31));
        assert_eq!(bank(32), (1, 1));
        assert_eq!(bank(53), (1, 1 << 21));
    }
}
