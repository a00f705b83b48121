//! Periodic sampling of inputs that need more than a plain pin read.
//!
//! Every strategy with at least one bound address gets its own task. A task sleeps between ticks
//! and runs the samples of a tick on the blocking pool since the timing loops spin. Results are
//! stored under the bank lock unless the scheduler was cancelled in the meantime.

pub mod dht22;
pub mod digital;
pub mod rc;
pub mod timing;

use crate::binding::{BindingTable, Strategy, Target};
use crate::config::PollersConfig;
use crate::gpio::{Gpio, Pin};
use crate::mem::{Bits, SharedBank, Words};
use crate::poll::timing::TimingError;

use futures_util::future::join_all;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Value obtained from one target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sample {
    /// Stored in the discrete inputs
    Level(bool),
    /// Stored in the input registers
    Count(u16),
    /// Stored in the input registers at the target address and the one after
    Climate { humidity: u16, temperature: u16 },
}

impl Sample {
    fn store(self, bank: &mut crate::mem::RegisterBank, addr: u16) {
        match self {
            Sample::Level(value) => bank.set_bit(Bits::DiscreteInputs, addr, value),
            Sample::Count(value) => bank.set_word(Words::InputRegisters, addr, value),
            Sample::Climate {
                humidity,
                temperature,
            } => {
                bank.set_word(Words::InputRegisters, addr, humidity);
                if let Some(next) = addr.checked_add(1) {
                    bank.set_word(Words::InputRegisters, next, temperature);
                }
            }
        }
    }
}

/// Sampling strategy of one kind of sensor
pub trait Sampler: Send + Sync {
    fn strategy(&self) -> Strategy;

    fn interval(&self) -> Duration;

    /// Take one sample of the sensor on `pin`, blocking the calling thread
    fn sample(&self, gpio: &dyn Gpio, pin: Pin) -> Result<Sample, TimingError>;
}

fn sampler(strategy: Strategy, config: &PollersConfig) -> Arc<dyn Sampler> {
    match strategy {
        Strategy::Pb => Arc::new(digital::Digital::new(config.pb.clone())),
        Strategy::Ldr => Arc::new(rc::Rc::new(config.ldr.clone())),
        Strategy::Dht22 => Arc::new(dht22::Dht22::new(config.dht22.clone())),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PollerState {
    Running = 0,
    /// Cancelled, the current tick is still being finished
    Stopping = 1,
    Stopped = 2,
    /// The task ended without observing the cancellation
    Failed = 3,
}

impl From<u8> for PollerState {
    fn from(value: u8) -> Self {
        match value {
            0 => PollerState::Running,
            1 => PollerState::Stopping,
            2 => PollerState::Stopped,
            _ => PollerState::Failed,
        }
    }
}

struct PollerTask {
    strategy: Strategy,
    state: Arc<AtomicU8>,
    handle: JoinHandle<()>,
}

impl PollerTask {
    fn state(&self, cancelled: bool) -> PollerState {
        match PollerState::from(self.state.load(Ordering::SeqCst)) {
            PollerState::Running if self.handle.is_finished() => PollerState::Failed,
            PollerState::Running if cancelled => PollerState::Stopping,
            state => state,
        }
    }
}

pub struct Scheduler {
    token: CancellationToken,
    tasks: Vec<PollerTask>,
}

impl Scheduler {
    /// Spawn one task per strategy that has targets in `table`
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        table: &BindingTable,
        config: &PollersConfig,
        gpio: Arc<dyn Gpio>,
        bank: SharedBank,
        token: CancellationToken,
    ) -> Self {
        let mut tasks = Vec::new();
        for strategy in Strategy::ALL {
            let targets = table.targets(strategy);
            if targets.is_empty() {
                continue;
            }
            tasks.push(Self::spawn(
                sampler(strategy, config),
                targets,
                gpio.clone(),
                bank.clone(),
                token.clone(),
            ));
        }
        Self { token, tasks }
    }

    fn spawn(
        sampler: Arc<dyn Sampler>,
        targets: Vec<Target>,
        gpio: Arc<dyn Gpio>,
        bank: SharedBank,
        token: CancellationToken,
    ) -> PollerTask {
        let strategy = sampler.strategy();
        let state = Arc::new(AtomicU8::new(PollerState::Running as u8));
        let task_state = state.clone();
        info!(%strategy, targets = targets.len(), interval = ?sampler.interval(), "starting poller");

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sampler.interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let targets = Arc::new(targets);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        task_state.store(PollerState::Stopping as u8, Ordering::SeqCst);
                        break;
                    }
                    _ = interval.tick() => {}
                }

                let samples = {
                    let sampler = sampler.clone();
                    let gpio = gpio.clone();
                    let targets = targets.clone();
                    let token = token.clone();
                    tokio::task::spawn_blocking(move || {
                        targets
                            .iter()
                            .take_while(|_| !token.is_cancelled())
                            .map(|target| (*target, sampler.sample(gpio.as_ref(), target.pin)))
                            .collect::<Vec<_>>()
                    })
                    .await
                };

                let samples = match samples {
                    Ok(samples) => samples,
                    Err(e) => {
                        warn!(%strategy, "sampling task failed: {e}");
                        continue;
                    }
                };

                if token.is_cancelled() {
                    task_state.store(PollerState::Stopping as u8, Ordering::SeqCst);
                    debug!(%strategy, "cancelled while sampling, results dropped");
                    break;
                }

                let mut bank = match bank.lock() {
                    Ok(bank) => bank,
                    Err(poisoned) => poisoned.into_inner(),
                };
                for (target, sample) in samples {
                    match sample {
                        Ok(sample) => {
                            trace!(%strategy, addr = target.addr, pin = target.pin, ?sample, "value refreshed");
                            sample.store(&mut bank, target.addr);
                        }
                        Err(e) => {
                            warn!(%strategy, addr = target.addr, pin = target.pin, "{e}, keeping previous value")
                        }
                    }
                }
            }

            info!(%strategy, "poller terminated");
            task_state.store(PollerState::Stopped as u8, Ordering::SeqCst);
        });

        PollerTask {
            strategy,
            state,
            handle,
        }
    }

    pub fn states(&self) -> Vec<(Strategy, PollerState)> {
        let cancelled = self.token.is_cancelled();
        self.tasks
            .iter()
            .map(|task| (task.strategy, task.state(cancelled)))
            .collect()
    }

    /// Cancel all pollers and wait for every one of them to finish
    pub async fn shutdown(self) -> Vec<(Strategy, PollerState)> {
        self.token.cancel();
        let (pending, handles): (Vec<_>, Vec<_>) = self
            .tasks
            .into_iter()
            .map(|task| ((task.strategy, task.state), task.handle))
            .unzip();
        let results = join_all(handles).await;

        let states = pending
            .into_iter()
            .zip(results)
            .map(|((strategy, state), result)| match result {
                Ok(()) => (strategy, PollerState::from(state.load(Ordering::SeqCst))),
                Err(e) => {
                    warn!(%strategy, "poller ended abnormally: {e}");
                    (strategy, PollerState::Failed)
                }
            })
            .collect();
        debug!("all pollers stopped");
        states
    }
}
