//! In-process simulated rig.
//!
//! `SimBench` stands in for the voltage rail, the clock domain and the
//! workload. Every mutation is appended to a shared journal together with
//! the checkpoints written by `MemoryStore`, so tests can compare what the
//! hardware saw against what was persisted at each step.
//!
//! The simulated workload passes at or above `fail_below` and fails below
//! it, unless outcomes have been scripted.

pub mod doubles;

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use vmin_common::{
    ClockBackend, HardwareError, Outcome, SearchPhase, Selector, TaskDescriptor, VoltageBackend,
    round_volts,
};

use crate::errors::VminResult;
use crate::hardware::Rig;
use crate::session::SessionState;
use crate::vmin_config::SimSection;
use crate::workload::{WorkloadMode, WorkloadRunner};

pub use doubles::{CollectingSink, MemoryStore, SimAutostart, SimWatchdog, sample_task};

const VOLTAGE_EPSILON: f64 = 1e-9;

/// One observable step on the simulated bench.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    VoltageSet {
        rail: String,
        package: Selector,
        volts: f64,
    },
    ClockSet {
        clock: String,
        value: f64,
        package: Selector,
        die: Selector,
    },
    WorkloadRun {
        volts: f64,
        outcome: Outcome,
    },
    WorkloadStopped,
    Checkpoint(Box<SessionState>),
    CheckpointDeleted,
    WatchdogTimeout(Duration),
    WatchdogStopped,
}

#[derive(Debug)]
struct BenchInner {
    initial_voltage: f64,
    rails: BTreeMap<String, f64>,
    clock_default: f64,
    clocks: BTreeMap<String, f64>,
    fail_below: f64,
    scripted: VecDeque<Outcome>,
    scripted_phase2: VecDeque<Outcome>,
    run_duration: Duration,
    readback: bool,
    fail_readback_at: Option<f64>,
    last_phase: SearchPhase,
    background_running: bool,
    journal: Vec<SimEvent>,
}

/// Shared handle to the simulated rig. Clones observe the same bench.
#[derive(Debug, Clone)]
pub struct SimBench {
    inner: Arc<Mutex<BenchInner>>,
}

impl SimBench {
    pub fn new(initial_voltage: f64, fail_below: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BenchInner {
                initial_voltage,
                rails: BTreeMap::new(),
                clock_default: 1000.0,
                clocks: BTreeMap::new(),
                fail_below,
                scripted: VecDeque::new(),
                scripted_phase2: VecDeque::new(),
                run_duration: Duration::ZERO,
                readback: true,
                fail_readback_at: None,
                last_phase: SearchPhase::NotStarted,
                background_running: false,
                journal: Vec::new(),
            })),
        }
    }

    pub fn from_settings(settings: &SimSection) -> Self {
        let bench = Self::new(settings.initial_voltage, settings.fail_below);
        bench.lock().clock_default = settings.clock_default;
        bench
    }

    fn lock(&self) -> MutexGuard<'_, BenchInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn record(&self, event: SimEvent) {
        let mut inner = self.lock();
        if let SimEvent::Checkpoint(state) = &event {
            inner.last_phase = state.phase;
        }
        inner.journal.push(event);
    }

    /// Wall-clock time every synchronous workload run takes.
    pub fn with_run_duration(self, duration: Duration) -> Self {
        self.lock().run_duration = duration;
        self
    }

    /// Make the rail behave like a backend that cannot be read back.
    pub fn with_write_only(self) -> Self {
        self.lock().readback = false;
        self
    }

    pub fn with_clock(self, name: &str, value: f64) -> Self {
        self.lock().clocks.insert(name.to_string(), value);
        self
    }

    /// Outcomes returned by the next synchronous runs, before the
    /// voltage rule applies.
    pub fn script_outcomes(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.lock().scripted.extend(outcomes);
    }

    /// Like `script_outcomes`, but only consumed once the last checkpoint
    /// reports phase2.
    pub fn script_phase2_outcomes(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.lock().scripted_phase2.extend(outcomes);
    }

    /// The next read-back of this voltage fails.
    pub fn fail_readback_at(&self, volts: f64) {
        self.lock().fail_readback_at = Some(volts);
    }

    pub fn voltage(&self, rail: &str) -> f64 {
        let inner = self.lock();
        inner.rails.get(rail).copied().unwrap_or(inner.initial_voltage)
    }

    pub fn clock(&self, name: &str) -> f64 {
        let inner = self.lock();
        inner.clocks.get(name).copied().unwrap_or(inner.clock_default)
    }

    pub fn is_workload_running(&self) -> bool {
        self.lock().background_running
    }

    pub fn journal(&self) -> Vec<SimEvent> {
        self.lock().journal.clone()
    }

    /// Every voltage written to any rail, in order.
    pub fn applied_voltages(&self) -> Vec<f64> {
        self.lock()
            .journal
            .iter()
            .filter_map(|e| match e {
                SimEvent::VoltageSet { volts, .. } => Some(*volts),
                _ => None,
            })
            .collect()
    }

    /// Voltage and outcome of every workload run, in order.
    pub fn workload_runs(&self) -> Vec<(f64, Outcome)> {
        self.lock()
            .journal
            .iter()
            .filter_map(|e| match e {
                SimEvent::WorkloadRun { volts, outcome } => Some((*volts, *outcome)),
                _ => None,
            })
            .collect()
    }

    /// Checkpoints written through this bench's `MemoryStore`, in order.
    pub fn checkpoints(&self) -> Vec<SessionState> {
        self.lock()
            .journal
            .iter()
            .filter_map(|e| match e {
                SimEvent::Checkpoint(state) => Some((**state).clone()),
                _ => None,
            })
            .collect()
    }

    pub fn voltage_backend(&self) -> Arc<dyn VoltageBackend> {
        Arc::new(self.clone())
    }

    pub fn clock_backend(&self) -> Arc<dyn ClockBackend> {
        Arc::new(self.clone())
    }

    pub fn workload(&self, mode: WorkloadMode) -> Arc<dyn WorkloadRunner> {
        Arc::new(SimWorkload {
            bench: self.clone(),
            mode,
        })
    }

    pub fn rig(&self, mode: WorkloadMode) -> Rig {
        Rig {
            voltage: self.voltage_backend(),
            clock: self.clock_backend(),
            workload: self.workload(mode),
        }
    }

    pub fn store(&self) -> MemoryStore {
        MemoryStore::journaled(self.clone())
    }

    pub fn watchdog(&self) -> SimWatchdog {
        SimWatchdog::journaled(self.clone())
    }
}

#[async_trait]
impl VoltageBackend for SimBench {
    fn name(&self) -> &'static str {
        "sim"
    }

    async fn set_voltage(
        &self,
        rail: &str,
        package: Selector,
        volts: f64,
    ) -> Result<(), HardwareError> {
        if volts <= 0.0 {
            return Err(HardwareError::Rejected {
                rail: rail.to_string(),
                volts,
                reason: "voltage must be positive".to_string(),
            });
        }
        let volts = round_volts(volts);
        self.lock().rails.insert(rail.to_string(), volts);
        self.record(SimEvent::VoltageSet {
            rail: rail.to_string(),
            package,
            volts,
        });
        Ok(())
    }

    async fn get_voltage(
        &self,
        rail: &str,
        _package: Selector,
    ) -> Result<Option<f64>, HardwareError> {
        let mut inner = self.lock();
        if !inner.readback {
            return Ok(None);
        }
        let volts = inner.rails.get(rail).copied().unwrap_or(inner.initial_voltage);
        if let Some(fault) = inner.fail_readback_at
            && (fault - volts).abs() < VOLTAGE_EPSILON
        {
            inner.fail_readback_at = None;
            return Err(HardwareError::ToolFailed {
                tool: "sim".to_string(),
                code: 1,
                stderr: format!("injected read-back fault at {:.6} V", volts),
            });
        }
        Ok(Some(volts))
    }
}

#[async_trait]
impl ClockBackend for SimBench {
    async fn set_clock(
        &self,
        clock: &str,
        value: f64,
        package: Selector,
        die: Selector,
    ) -> Result<(), HardwareError> {
        self.lock().clocks.insert(clock.to_string(), value);
        self.record(SimEvent::ClockSet {
            clock: clock.to_string(),
            value,
            package,
            die,
        });
        Ok(())
    }

    async fn get_clock(&self, clock: &str) -> Result<f64, HardwareError> {
        Ok(self.clock(clock))
    }
}

/// Workload whose verdict depends on the simulated rail voltage.
pub struct SimWorkload {
    bench: SimBench,
    mode: WorkloadMode,
}

#[async_trait]
impl WorkloadRunner for SimWorkload {
    fn mode(&self) -> WorkloadMode {
        self.mode
    }

    async fn run(&self, task: &TaskDescriptor) -> VminResult<Outcome> {
        let volts = self.bench.voltage(&task.voltage_rail_name);
        let (outcome, duration) = {
            let mut inner = self.bench.lock();
            match self.mode {
                WorkloadMode::Background => {
                    inner.background_running = true;
                    (Outcome::Indeterminate, Duration::ZERO)
                }
                WorkloadMode::Synchronous => {
                    let mut scripted = None;
                    if inner.last_phase == SearchPhase::Phase2 {
                        scripted = inner.scripted_phase2.pop_front();
                    }
                    if scripted.is_none() {
                        scripted = inner.scripted.pop_front();
                    }
                    let outcome = scripted.unwrap_or(if volts < inner.fail_below - VOLTAGE_EPSILON {
                        Outcome::Fail
                    } else {
                        Outcome::Pass
                    });
                    (outcome, inner.run_duration)
                }
            }
        };
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
        debug!(volts, %outcome, "Simulated workload run");
        self.bench.record(SimEvent::WorkloadRun { volts, outcome });
        Ok(outcome)
    }

    async fn stop(&self) -> VminResult<()> {
        let was_running = {
            let mut inner = self.bench.lock();
            std::mem::replace(&mut inner.background_running, false)
        };
        if was_running {
            self.bench.record(SimEvent::WorkloadStopped);
        }
        Ok(())
    }
}
