use tracing::{info, warn};
use vmin_common::{SearchPhase, round_volts};

use super::{Phase2Entry, SearchEngine, TaskVerdict, VOLTAGE_EPSILON};
use crate::errors::VminResult;
use crate::session::SessionState;
use crate::workload::WorkloadMode;

impl SearchEngine<'_> {
    /// Coarse downward sweep from the starting voltage.
    ///
    /// Synchronous workloads end the sweep with an explicit fail. Background
    /// workloads have no software end signal: the sweep continues until the
    /// watchdog reboots the host or the floor is reached.
    pub(super) async fn phase1(&self, state: &mut SessionState) -> VminResult<TaskVerdict> {
        let task = state.task()?.clone();
        let key = task.package_key();
        info!(
            task = %task.id,
            rail = %task.voltage_rail_name,
            package = %task.asic_package,
            start = task.starting_voltage,
            step = task.voltage_step,
            "Starting phase1"
        );

        if !state.original_voltage.contains_key(&key) {
            let original = match self
                .rig
                .voltage
                .get_voltage(&task.voltage_rail_name, task.asic_package)
                .await?
            {
                Some(volts) => volts,
                None => task.starting_voltage + self.search.smu_original_margin,
            };
            let original = round_volts(original);
            info!(volts = original, "Captured original voltage");
            state.original_voltage.insert(key.clone(), original);
        }
        state.phase = SearchPhase::Phase1;
        state.set_target(round_volts(task.starting_voltage));
        self.checkpoint(state)?;

        self.watchdog.update_timeout(self.heartbeat_gap(state)).await?;
        self.apply_clocks(state).await?;
        self.checkpoint(state)?;

        let mode = self.rig.workload.mode();
        match mode {
            WorkloadMode::Synchronous => {
                // Baseline at the untouched voltage sizes the heartbeat gap.
                let (outcome, elapsed) = self.run_workload(state).await?;
                if !outcome.is_pass() {
                    warn!(task = %task.id, %outcome, "Workload fails at the original voltage; skipping task");
                    state.task_done = false;
                    return Ok(TaskVerdict::BaselineFailed);
                }
                let gap = self.calibrator.calibrate(elapsed);
                state.watchdog_timeout = gap.as_secs_f64();
                self.checkpoint(state)?;
                info!(
                    measured_secs = elapsed.as_secs_f64(),
                    timeout_secs = state.watchdog_timeout,
                    "Calibrated watchdog timeout"
                );
            }
            WorkloadMode::Background => {
                tokio::time::sleep(task.launch_delay()).await;
                self.rig.workload.run(&task).await?;
            }
        }

        let floor = self.search.min_voltage.max(0.0);
        loop {
            let target = state.current_voltage()?;
            if target <= 0.0 || target < floor - VOLTAGE_EPSILON {
                info!(volts = target, floor, "Reached phase1 floor");
                break;
            }

            let actual = self.apply_voltage(state, target).await?;
            tokio::time::sleep(task.phase1_dwell()).await;

            let passed = match mode {
                WorkloadMode::Synchronous => self.run_workload(state).await?.0.is_pass(),
                // Still running after the dwell means the rail held.
                WorkloadMode::Background => true,
            };
            if !passed {
                info!(volts = actual, "Phase1 failure");
                break;
            }

            state.last_passing_voltage.insert(key.clone(), actual);
            state.set_target(round_volts(target - task.voltage_step));
            self.checkpoint(state)?;
        }

        self.phase2(state, Phase2Entry::FromPhase1).await
    }
}
