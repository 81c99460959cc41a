//! Hardware backends and the per-task rig.
//!
//! The backend is chosen once per task from `voltage_module`:
//! - `atitool`: rail and clocks through `AtitoolBackend`, read-back capable
//! - `smu`: write-only rail through `SmuBackend`, clocks still via atitool
//! - `sim`: the in-process `SimBench`

pub mod atitool;
pub mod smu;
pub mod tool;

use std::sync::Arc;
use tracing::debug;
use vmin_common::{ClockBackend, TaskDescriptor, VoltageBackend, VoltageModule};

use crate::errors::VminResult;
use crate::session::SessionState;
use crate::sim::SimBench;
use crate::vmin_config::ToolsSection;
use crate::workload::{BackgroundApp, DiagHarness, WorkloadMode, WorkloadRunner};

pub use atitool::AtitoolBackend;
pub use smu::SmuBackend;
pub use tool::{ToolCommand, parse_number};

/// Owned handles to everything the search touches for one task.
#[derive(Clone)]
pub struct Rig {
    pub voltage: Arc<dyn VoltageBackend>,
    pub clock: Arc<dyn ClockBackend>,
    pub workload: Arc<dyn WorkloadRunner>,
}

/// Builds the rig for a task.
/// Real implementation: `ToolRigFactory`.
pub trait RigFactory: Send + Sync {
    fn build(&self, task: &TaskDescriptor, state: &SessionState) -> VminResult<Rig>;
}

/// Selects external tools or the simulated bench from the task's module.
pub struct ToolRigFactory {
    tools: ToolsSection,
    mode: WorkloadMode,
    sim: SimBench,
}

impl ToolRigFactory {
    pub fn new(tools: ToolsSection, mode: WorkloadMode, sim: SimBench) -> Self {
        Self { tools, mode, sim }
    }

    fn workload(&self, state: &SessionState) -> Arc<dyn WorkloadRunner> {
        match self.mode {
            WorkloadMode::Synchronous => Arc::new(DiagHarness::new(
                &self.tools.diag_cmd,
                state.diag_folder.clone(),
            )),
            WorkloadMode::Background => Arc::new(BackgroundApp::new(state.diag_folder.clone())),
        }
    }
}

impl RigFactory for ToolRigFactory {
    fn build(&self, task: &TaskDescriptor, state: &SessionState) -> VminResult<Rig> {
        debug!(task = %task.id, module = %task.voltage_module, mode = %self.mode, "Building rig");
        let timeout = task.tool_timeout();
        let rig = match task.voltage_module {
            VoltageModule::Atitool => {
                let atitool = Arc::new(AtitoolBackend::new(&self.tools.atitool_cmd, timeout));
                Rig {
                    voltage: atitool.clone(),
                    clock: atitool,
                    workload: self.workload(state),
                }
            }
            VoltageModule::Smu => Rig {
                voltage: Arc::new(SmuBackend::new(&self.tools.smu_cmd, timeout)),
                clock: Arc::new(AtitoolBackend::new(&self.tools.atitool_cmd, timeout)),
                workload: self.workload(state),
            },
            VoltageModule::Sim => self.sim.rig(self.mode),
        };
        Ok(rig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionParams;
    use crate::sim::sample_task;
    use std::path::PathBuf;

    fn state() -> SessionState {
        SessionState::new(
            ConnectionParams::default(),
            PathBuf::from("/lab/vmin_tasks.csv"),
            PathBuf::from("/lab/diag"),
        )
    }

    #[test]
    fn test_factory_selects_backend_by_module() {
        let factory = ToolRigFactory::new(
            ToolsSection::default(),
            WorkloadMode::Synchronous,
            SimBench::new(1.0, 0.85),
        );
        let mut task = sample_task("1");

        task.voltage_module = VoltageModule::Atitool;
        let rig = factory.build(&task, &state()).unwrap();
        assert_eq!(rig.voltage.name(), "atitool");
        assert_eq!(rig.workload.mode(), WorkloadMode::Synchronous);

        task.voltage_module = VoltageModule::Smu;
        assert_eq!(factory.build(&task, &state()).unwrap().voltage.name(), "smu");

        task.voltage_module = VoltageModule::Sim;
        assert_eq!(factory.build(&task, &state()).unwrap().voltage.name(), "sim");
    }

    #[test]
    fn test_background_mode_uses_background_app() {
        let factory = ToolRigFactory::new(
            ToolsSection::default(),
            WorkloadMode::Background,
            SimBench::new(1.0, 0.85),
        );
        let mut task = sample_task("1");
        task.voltage_module = VoltageModule::Atitool;
        let rig = factory.build(&task, &state()).unwrap();
        assert_eq!(rig.workload.mode(), WorkloadMode::Background);
    }
}
