use tracing::{info, warn};
use vmin_common::{SearchPhase, round_volts};

use super::{Phase2Entry, SearchEngine, TaskVerdict, VMIN_PHASE1, VMIN_PHASE2, VOLTAGE_EPSILON};
use crate::errors::VminResult;
use crate::session::SessionState;
use crate::workload::WorkloadMode;

impl SearchEngine<'_> {
    /// Upward confirmation from the phase1 result, bounded by the ceiling.
    pub(super) async fn phase2(
        &self,
        state: &mut SessionState,
        entry: Phase2Entry,
    ) -> VminResult<TaskVerdict> {
        let task = state.task()?.clone();
        let key = task.package_key();

        match entry {
            Phase2Entry::FromPhase1 => {
                let start = match state.last_passing_voltage.get(&key) {
                    Some(volts) => *volts,
                    None => {
                        warn!(
                            task = %task.id,
                            "No passing voltage recorded in phase1; starting phase2 at the starting voltage"
                        );
                        round_volts(task.starting_voltage)
                    }
                };
                // The rail still sits at the voltage that failed phase1.
                state.set_target(start);
                state.record_result(VMIN_PHASE1, start);
                state.phase = SearchPhase::Phase2;
            }
            Phase2Entry::Resumed => {
                let current = state.current_voltage()?;
                if state.voltage_applied {
                    // The reboot happened while this voltage was on the rail.
                    state.set_target(round_volts(current + task.voltage_step));
                } else {
                    info!(volts = current, "Interrupted before the voltage was applied; retrying it");
                }
            }
        }
        self.checkpoint(state)?;
        info!(task = %task.id, start = ?state.current_voltage, "Starting phase2");

        self.rig.workload.stop().await?;
        tokio::time::sleep(self.search.phase2_warmup()).await;

        let ceiling = self.ceiling(state)?;
        let mode = self.rig.workload.mode();
        loop {
            self.apply_clocks(state).await?;

            let target = state.current_voltage()?;
            if target > ceiling + VOLTAGE_EPSILON {
                warn!(volts = target, ceiling, "Maximum voltage reached; stopping task");
                self.restore_original(state).await?;
                state.task_done = false;
                self.checkpoint(state)?;
                return Ok(TaskVerdict::OverVoltage);
            }

            self.apply_voltage(state, target).await?;

            let passed = match mode {
                WorkloadMode::Background => {
                    tokio::time::sleep(task.launch_delay()).await;
                    self.rig.workload.run(&task).await?;
                    tokio::time::sleep(task.phase2_dwell()).await;
                    self.rig.workload.stop().await?;
                    true
                }
                WorkloadMode::Synchronous => {
                    tokio::time::sleep(task.phase2_dwell()).await;
                    // Any single pass is enough; every loop still runs.
                    let mut any_pass = false;
                    for _ in 0..task.diag_loops.max(1) {
                        let (outcome, _) = self.run_workload(state).await?;
                        any_pass |= outcome.is_pass();
                    }
                    any_pass
                }
            };
            if passed {
                break;
            }

            let next = round_volts(target + task.voltage_step);
            info!(failed_at = target, next, "Phase2 failure; stepping up");
            state.set_target(next);
            self.checkpoint(state)?;
        }

        let vmin = state
            .actual_voltage
            .get(&key)
            .copied()
            .or(state.current_voltage)
            .unwrap_or(task.starting_voltage);
        self.rig.workload.stop().await?;
        self.restore_original(state).await?;
        self.restore_default_clocks(state).await?;
        state.record_result(VMIN_PHASE2, vmin);
        state.task_done = true;
        self.checkpoint(state)?;
        info!(
            task = %task.id,
            vmin_phase1 = ?state.result(VMIN_PHASE1),
            vmin_phase2 = vmin,
            "Completed phase2"
        );
        Ok(TaskVerdict::Passed)
    }
}
