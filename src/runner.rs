//! The session loop: pull a task, search it, report it, move on.

use std::sync::Arc;
use tracing::{error, info, warn};
use vmin_common::{Selector, WatchdogClient};

use crate::engine::{SearchEngine, TaskVerdict};
use crate::errors::VminResult;
use crate::hardware::{Rig, RigFactory};
use crate::platform::Autostart;
use crate::recovery::RecoveryCoordinator;
use crate::results::{ResultSink, TaskRecord};
use crate::session::{PersistentStore, SessionState};
use crate::tasks::{TaskDefaults, TaskQueue};
use crate::vmin_config::VminToml;

/// Owned handles to every collaborator of a session.
pub struct SessionContext {
    pub store: Arc<dyn PersistentStore>,
    pub watchdog: Arc<dyn WatchdogClient>,
    pub autostart: Arc<dyn Autostart>,
    pub results: Arc<dyn ResultSink>,
    pub rigs: Arc<dyn RigFactory>,
    pub settings: VminToml,
}

/// Drives tasks from the queue through the search engine until the queue
/// is exhausted or a fault ends the run.
pub struct Orchestrator<'a> {
    ctx: &'a SessionContext,
    active_rig: Option<Rig>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(ctx: &'a SessionContext) -> Self {
        Self {
            ctx,
            active_rig: None,
        }
    }

    /// Rig of the task in flight, if any.
    pub fn active_rig(&self) -> Option<&Rig> {
        self.active_rig.as_ref()
    }

    fn checkpoint(&self, state: &SessionState) -> VminResult<()> {
        self.ctx.store.save(state)
    }

    /// Process tasks until the queue runs dry. Returns how many tasks were
    /// finished by this process.
    pub async fn run(&mut self, state: &mut SessionState) -> VminResult<usize> {
        let mut finished = 0;
        loop {
            if state.task.is_none() {
                let mut queue = TaskQueue::new(
                    state.task_file.clone(),
                    state.task_index,
                    TaskDefaults {
                        voltage_step: self.ctx.settings.search.default_voltage_step,
                    },
                );
                let Some(task) = queue.current()? else {
                    info!(
                        source = %state.task_file.display(),
                        rows = queue.index(),
                        finished,
                        "Task queue exhausted"
                    );
                    state.task_index = queue.index();
                    return Ok(finished);
                };
                state.task_index = queue.index();
                state.begin_task(task);
                self.checkpoint(state)?;
            } else {
                info!(
                    task_index = state.task_index,
                    phase = %state.phase,
                    "Resuming task in flight"
                );
            }

            let verdict = self.run_task(state).await?;
            let record = TaskRecord::from_state(state)?;
            self.ctx.results.emit(&record)?;
            info!(task = %record.id, %verdict, "Task finished");

            state.finish_task();
            self.checkpoint(state)?;
            self.active_rig = None;
            finished += 1;
        }
    }

    async fn run_task(&mut self, state: &mut SessionState) -> VminResult<TaskVerdict> {
        let task = state.task()?.clone();
        let rig = self.ctx.rigs.build(&task, state)?;
        self.active_rig = Some(rig.clone());
        rig.voltage.wait_ready().await?;

        let mut captured = false;
        for clock in &task.clock_names {
            if state.default_clock.contains_key(clock) {
                continue;
            }
            let value = rig.clock.get_clock(clock).await?;
            info!(clock = %clock, value, "Captured default clock");
            state.default_clock.insert(clock.clone(), value);
            captured = true;
        }
        if captured {
            self.checkpoint(state)?;
        }

        let engine = SearchEngine::new(
            &rig,
            self.ctx.watchdog.as_ref(),
            self.ctx.store.as_ref(),
            &self.ctx.settings,
        );
        let verdict = engine.drive(state).await?;

        rig.workload.stop().await?;
        if !verdict.is_pass() {
            for (clock, value) in &state.default_clock {
                rig.clock
                    .set_clock(clock, *value, Selector::All, Selector::All)
                    .await?;
            }
            warn!(task = %task.id, %verdict, "Task did not pass");
        }
        Ok(verdict)
    }
}

/// Run a whole session: startup, the task loop, then unconditional
/// teardown. A fault never skips teardown.
pub async fn run_session(ctx: &SessionContext, mut state: SessionState) -> VminResult<usize> {
    let recovery = RecoveryCoordinator::new(ctx);
    if let Err(e) = recovery.startup(&state).await {
        error!(error = %e, "Session startup failed");
        recovery.teardown(None, None, false).await;
        return Err(e);
    }

    let mut orchestrator = Orchestrator::new(ctx);
    let result = orchestrator.run(&mut state).await;
    if let Err(e) = &result
        && e.is_unexpected()
    {
        error!(
            error = ?e,
            task_index = state.task_index,
            phase = %state.phase,
            voltage = ?state.current_voltage,
            "Unexpected fault; restoring hardware"
        );
        tokio::time::sleep(ctx.settings.search.error_pause()).await;
    }

    recovery
        .teardown(Some(&state), orchestrator.active_rig(), result.is_ok())
        .await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VminError;
    use crate::hardware::ToolRigFactory;
    use crate::session::ConnectionParams;
    use crate::sim::{CollectingSink, SimAutostart, SimBench, SimWatchdog};
    use crate::vmin_config::ToolsSection;
    use crate::workload::WorkloadMode;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    const HEADER: &str = "id,starting_voltage,voltage_step,phase1_duration,phase2_duration,workload,workload_delay,voltage_rail_name,asic_package,voltage_module\n";

    fn write_sheet(dir: &Path, rows: &[&str]) -> PathBuf {
        let path = dir.join("vmin_tasks.csv");
        let mut content = HEADER.to_string();
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    struct Harness {
        ctx: SessionContext,
        bench: SimBench,
        watchdog: Arc<SimWatchdog>,
        autostart: Arc<SimAutostart>,
        sink: Arc<CollectingSink>,
        store: Arc<crate::sim::MemoryStore>,
    }

    fn harness(bench: SimBench) -> Harness {
        let mut settings = VminToml::default();
        settings.search.settle_secs = 0.0;
        settings.search.phase2_warmup_secs = 0.0;
        let watchdog = Arc::new(bench.watchdog());
        let autostart = Arc::new(SimAutostart::new());
        let sink = Arc::new(CollectingSink::new());
        let store = Arc::new(bench.store());
        let ctx = SessionContext {
            store: store.clone(),
            watchdog: watchdog.clone(),
            autostart: autostart.clone(),
            results: sink.clone(),
            rigs: Arc::new(ToolRigFactory::new(
                ToolsSection::default(),
                WorkloadMode::Synchronous,
                bench.clone(),
            )),
            settings,
        };
        Harness {
            ctx,
            bench,
            watchdog,
            autostart,
            sink,
            store,
        }
    }

    fn session(task_file: PathBuf) -> SessionState {
        SessionState::new(ConnectionParams::default(), task_file, PathBuf::from("diag"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_rows_are_never_processed() {
        let dir = tempdir().unwrap();
        let path = write_sheet(
            dir.path(),
            &[
                "#1,1.0,0.05,1,1,diag_sim,0,VDD,0,sim",
                "2,1.0,0.05,1,1,diag_sim,0,VDD,0,sim",
                "3,1.0,0.05,1,1,diag_sim,0,VDD,0,sim",
            ],
        );
        let h = harness(SimBench::new(1.0, 0.85));

        let finished = run_session(&h.ctx, session(path)).await.unwrap();

        assert_eq!(finished, 2);
        let ids: Vec<_> = h.sink.records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["2", "3"]);
        assert!(h.store.latest().is_none());
        assert!(!h.watchdog.is_running());
        assert!(!h.autostart.is_registered());
        assert_eq!(h.autostart.registrations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_task_source_keeps_checkpoint() {
        let dir = tempdir().unwrap();
        let h = harness(SimBench::new(1.0, 0.85));

        let err = run_session(&h.ctx, session(dir.path().join("missing.csv")))
            .await
            .unwrap_err();

        assert!(matches!(err, VminError::TaskSourceMissing { .. }));
        assert_eq!(err.exit_code(), 1);
        assert!(h.store.latest().is_some());
        assert!(h.bench.applied_voltages().is_empty());
        assert_eq!(h.watchdog.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_clocks_captured_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vmin_tasks.csv");
        std::fs::write(
            &path,
            "id,starting_voltage,voltage_step,phase1_duration,phase2_duration,workload,workload_delay,voltage_rail_name,asic_package,voltage_module,clk_sclk\n\
             1,1.0,0.05,1,1,diag_sim,0,VDD,0,sim,1600\n\
             2,1.0,0.05,1,1,diag_sim,0,VDD,0,sim,\n",
        )
        .unwrap();
        let h = harness(SimBench::new(1.0, 0.85).with_clock("sclk", 1800.0));

        run_session(&h.ctx, session(path)).await.unwrap();

        let records = h.sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].clocks, vec![("sclk".to_string(), 1600.0)]);
        assert!(records[1].clocks.is_empty());
        assert_eq!(h.bench.clock("sclk"), 1800.0);
        let captured = h
            .store
            .history()
            .into_iter()
            .filter_map(|s| s.default_clock.get("sclk").copied())
            .collect::<Vec<_>>();
        assert!(captured.iter().all(|v| *v == 1800.0));
    }
}
