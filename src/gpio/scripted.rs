use crate::gpio::{Edge, Gpio, GpioError, Level, Mode, Pin, Pull};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Script = Box<dyn Fn(Pin, usize) -> Level + Send + Sync>;

/// Test double whose read results come from a closure over the pin and the read index
pub struct Scripted {
    script: Script,
    reads: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl Scripted {
    pub fn new(script: impl Fn(Pin, usize) -> Level + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            reads: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of reads since construction
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Every call except reads, formatted as `name(pin, args)`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Gpio for Scripted {
    fn set_mode(&self, pin: Pin, mode: Mode) {
        self.record(format!("set_mode({pin}, {mode:?})"));
    }

    fn write(&self, pin: Pin, level: Level) {
        self.record(format!("write({pin}, {level:?})"));
    }

    fn read(&self, pin: Pin) -> Level {
        let idx = self.reads.fetch_add(1, Ordering::SeqCst);
        (self.script)(pin, idx)
    }

    fn set_pull(&self, pin: Pin, pull: Pull) {
        self.record(format!("set_pull({pin}, {pull:?})"));
    }

    fn detect_edge(&self, pin: Pin, edge: Edge) {
        self.record(format!("detect_edge({pin}, {edge:?})"));
    }

    fn edge_detected(&self, _pin: Pin) -> bool {
        false
    }

    fn set_frequency(&self, pin: Pin, hz: u32) {
        self.record(format!("set_frequency({pin}, {hz})"));
    }

    fn set_duty_cycle(&self, pin: Pin, duty: u32, cycle: u32) {
        self.record(format!("set_duty_cycle({pin}, {duty}, {cycle})"));
    }

    fn close(&self) -> Result<(), GpioError> {
        Ok(())
    }
}
