//! The two-phase voltage search.
//!
//! ```text
//! Idle ──► Phase1 (step down) ──fail / floor / restart──► Phase2 (step up) ──► Idle
//!                                                            │  ▲
//!                                                            └──┘ all loops fail
//! ```
//!
//! Every hardware mutation is followed by a checkpoint before the next one,
//! so a watchdog reboot at any point resumes from consistent state. Where the
//! engine picks up after a restart depends only on the persisted phase:
//! - `NotStarted`: begin phase1
//! - `Phase1`: the previous process died mid-sweep, which counts as a failure
//!   at the current step; move to phase2 from the last passing voltage
//! - `Phase2`: if the checkpointed voltage had reached the rail, the attempt
//!   died there and the retry goes one step higher; otherwise that voltage
//!   was never tried and is retried as is

mod phase1;
mod phase2;

use std::time::Duration;
use tracing::{debug, info, warn};
use vmin_common::{Outcome, SearchPhase, Selector, WatchdogClient, round_volts};

use crate::errors::{VminError, VminResult};
use crate::hardware::Rig;
use crate::session::{PersistentStore, SessionState};
use crate::vmin_config::{SearchSection, VminToml};
use crate::workload::TimeoutCalibrator;

pub const VMIN_PHASE1: &str = "vmin_phase1";
pub const VMIN_PHASE2: &str = "vmin_phase2";

const VOLTAGE_EPSILON: f64 = 1e-9;

/// How a task's search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskVerdict {
    /// Phase2 confirmed a stable voltage
    Passed,
    /// The workload failed at the untouched voltage; nothing was searched
    BaselineFailed,
    /// Phase2 would have exceeded the voltage ceiling
    OverVoltage,
}

impl TaskVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, TaskVerdict::Passed)
    }
}

impl std::fmt::Display for TaskVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskVerdict::Passed => write!(f, "passed"),
            TaskVerdict::BaselineFailed => write!(f, "baseline failed"),
            TaskVerdict::OverVoltage => write!(f, "over voltage"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase2Entry {
    FromPhase1,
    Resumed,
}

pub struct SearchEngine<'a> {
    rig: &'a Rig,
    watchdog: &'a dyn WatchdogClient,
    store: &'a dyn PersistentStore,
    search: &'a SearchSection,
    calibrator: TimeoutCalibrator,
    initial_timeout: Duration,
}

impl<'a> SearchEngine<'a> {
    pub fn new(
        rig: &'a Rig,
        watchdog: &'a dyn WatchdogClient,
        store: &'a dyn PersistentStore,
        settings: &'a VminToml,
    ) -> Self {
        Self {
            rig,
            watchdog,
            store,
            search: &settings.search,
            calibrator: TimeoutCalibrator::from_settings(&settings.watchdog),
            initial_timeout: settings.watchdog.initial_timeout(),
        }
    }

    /// Run or resume the active task's search until it reaches a verdict.
    pub async fn drive(&self, state: &mut SessionState) -> VminResult<TaskVerdict> {
        let task_id = state.task()?.id.clone();
        match state.phase {
            SearchPhase::NotStarted => self.phase1(state).await,
            _ if state.task_done => {
                info!(task = %task_id, "Task completed before restart");
                Ok(TaskVerdict::Passed)
            }
            SearchPhase::Phase1 => {
                warn!(
                    task = %task_id,
                    voltage = ?state.current_voltage,
                    "Restarted during phase1; treating the interrupted step as a failure"
                );
                self.phase2(state, Phase2Entry::FromPhase1).await
            }
            SearchPhase::Phase2 => {
                warn!(
                    task = %task_id,
                    voltage = ?state.current_voltage,
                    applied = state.voltage_applied,
                    "Restarted during phase2"
                );
                self.phase2(state, Phase2Entry::Resumed).await
            }
        }
    }

    fn checkpoint(&self, state: &SessionState) -> VminResult<()> {
        self.store.save(state)
    }

    /// Heartbeat gap to allow around a workload run.
    fn heartbeat_gap(&self, state: &SessionState) -> Duration {
        state.calibrated_timeout().unwrap_or(self.initial_timeout)
    }

    fn ceiling(&self, state: &SessionState) -> VminResult<f64> {
        Ok(state.task()?.max_voltage.unwrap_or(self.search.max_voltage))
    }

    /// Baseline clocks everywhere, then the task's overrides on its
    /// package/die.
    async fn apply_clocks(&self, state: &SessionState) -> VminResult<()> {
        let task = state.task()?;
        for (clock, value) in &state.default_clock {
            self.rig
                .clock
                .set_clock(clock, *value, Selector::All, Selector::All)
                .await?;
        }
        for clock in &task.adjust_clock {
            self.rig
                .clock
                .set_clock(&clock.name, clock.value, task.asic_package, task.asic_die)
                .await?;
        }
        if !state.default_clock.is_empty() || !task.adjust_clock.is_empty() {
            debug!(
                defaults = state.default_clock.len(),
                overrides = task.adjust_clock.len(),
                "Clocks applied"
            );
        }
        Ok(())
    }

    async fn restore_default_clocks(&self, state: &SessionState) -> VminResult<()> {
        for (clock, value) in &state.default_clock {
            self.rig
                .clock
                .set_clock(clock, *value, Selector::All, Selector::All)
                .await?;
        }
        Ok(())
    }

    /// Read the rail; backends without read-back report `assumed`.
    async fn read_voltage(&self, state: &mut SessionState, assumed: f64) -> VminResult<f64> {
        let task = state.task()?;
        let key = task.package_key();
        let actual = self
            .rig
            .voltage
            .get_voltage(&task.voltage_rail_name, task.asic_package)
            .await?
            .map(round_volts)
            .unwrap_or(assumed);
        state.actual_voltage.insert(key, actual);
        Ok(actual)
    }

    /// Set the rail, confirm it and checkpoint, then let it settle.
    async fn apply_voltage(&self, state: &mut SessionState, volts: f64) -> VminResult<f64> {
        let volts = round_volts(volts);
        {
            let task = state.task()?;
            info!(
                rail = %task.voltage_rail_name,
                package = %task.asic_package,
                volts,
                phase = %state.phase,
                "Setting voltage"
            );
            self.rig
                .voltage
                .set_voltage(&task.voltage_rail_name, task.asic_package, volts)
                .await?;
        }
        state.current_voltage = Some(volts);
        state.voltage_applied = true;
        let actual = self.read_voltage(state, volts).await?;
        if (actual - volts).abs() > VOLTAGE_EPSILON {
            debug!(requested = volts, actual, "Rail settled away from request");
        }
        self.checkpoint(state)?;
        tokio::time::sleep(self.search.settle()).await;
        Ok(actual)
    }

    /// Put the rail back to the task's restore target and record what the
    /// hardware reports afterwards.
    async fn restore_original(&self, state: &mut SessionState) -> VminResult<()> {
        let Some(original) = state.restore_target() else {
            warn!("No original voltage recorded; leaving rail as is");
            return Ok(());
        };
        {
            let task = state.task()?;
            info!(rail = %task.voltage_rail_name, volts = original, "Restoring original voltage");
            self.rig
                .voltage
                .set_voltage(&task.voltage_rail_name, task.asic_package, original)
                .await?;
        }
        state.voltage_applied = false;
        self.read_voltage(state, original).await?;
        Ok(())
    }

    /// One synchronous workload invocation after the launch delay.
    ///
    /// A harness that cannot be run counts as a failing result.
    async fn run_workload(&self, state: &SessionState) -> VminResult<(Outcome, Duration)> {
        let task = state.task()?;
        tokio::time::sleep(task.launch_delay()).await;
        self.watchdog
            .update_timeout(self.heartbeat_gap(state))
            .await?;

        let started = tokio::time::Instant::now();
        let outcome = match self.rig.workload.run(task).await {
            Ok(outcome) => outcome,
            Err(VminError::Diagnostic(message)) => {
                warn!(task = %task.id, %message, "Diagnostic could not run; counting as fail");
                Outcome::Fail
            }
            Err(e) => return Err(e),
        };
        let elapsed = started.elapsed();
        info!(
            task = %task.id,
            voltage = ?state.current_voltage,
            %outcome,
            elapsed_secs = elapsed.as_secs_f64(),
            "Workload finished"
        );
        Ok((outcome, elapsed))
    }
}
