//! Session startup and unconditional teardown.

use std::path::PathBuf;
use tracing::{error, info, warn};
use vmin_common::Selector;

use crate::config::{Config, DEFAULT_DIAG_FOLDER, DEFAULT_TASK_FILE};
use crate::errors::{VminError, VminResult};
use crate::hardware::Rig;
use crate::runner::SessionContext;
use crate::session::{ConnectionParams, PersistentStore, SessionState, load_required};

/// What the operator passed on the command line.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    /// Discard any checkpoint and start at the first task
    pub fresh: bool,
    pub connection: ConnectionParams,
    pub task_file: Option<PathBuf>,
    pub diag_folder: Option<PathBuf>,
}

/// Create a new session or restore the checkpointed one.
///
/// Connection parameters given on a resume replace the stored ones. Fails
/// before any hardware is touched when the watchdog server or peer is
/// unknown.
pub fn resolve_state(
    store: &dyn PersistentStore,
    request: &StartRequest,
) -> VminResult<SessionState> {
    let mut state = if request.fresh {
        if let Some(previous) = store.load()?
            && previous.phase.in_flight()
        {
            warn!(
                task_index = previous.task_index,
                phase = %previous.phase,
                "Discarding an in-flight session"
            );
        }
        let task_file = request
            .task_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TASK_FILE));
        let diag_folder = request
            .diag_folder
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DIAG_FOLDER));
        SessionState::new(
            request.connection.clone(),
            Config::absolutize(&task_file)?,
            Config::absolutize(&diag_folder)?,
        )
    } else {
        let mut state = load_required(store)?;
        let overrides = &request.connection;
        if overrides.server_ip.is_some() {
            state.connection.server_ip = overrides.server_ip.clone();
        }
        if overrides.wombat_ip.is_some() {
            state.connection.wombat_ip = overrides.wombat_ip.clone();
        }
        if overrides.client_ip.is_some() {
            state.connection.client_ip = overrides.client_ip.clone();
        }
        state
    };

    let missing = state.connection.missing_required();
    if !missing.is_empty() {
        return Err(VminError::configuration(format!(
            "Need valid server and wombat ip (missing: {})",
            missing.join(", ")
        )));
    }
    if !request.fresh {
        info!(
            task_index = state.task_index,
            phase = %state.phase,
            "Restored session from checkpoint"
        );
    }
    Ok(state)
}

pub struct RecoveryCoordinator<'a> {
    ctx: &'a SessionContext,
}

impl<'a> RecoveryCoordinator<'a> {
    pub fn new(ctx: &'a SessionContext) -> Self {
        Self { ctx }
    }

    /// Persist the session, arrange a relaunch after reboot and start the
    /// heartbeat.
    pub async fn startup(&self, state: &SessionState) -> VminResult<()> {
        self.ctx.store.save(state)?;
        self.ctx.autostart.register()?;
        let timeout = state
            .calibrated_timeout()
            .unwrap_or_else(|| self.ctx.settings.watchdog.initial_timeout());
        self.ctx.watchdog.start(timeout).await?;
        info!("{}", state);
        Ok(())
    }

    /// Return the hardware to a safe state and release every service.
    ///
    /// Each step is attempted even when an earlier one fails; failures are
    /// logged and never returned.
    pub async fn teardown(
        &self,
        state: Option<&SessionState>,
        active: Option<&Rig>,
        exhausted: bool,
    ) {
        info!(exhausted, "Cleaning up");
        if let Some(state) = state
            && let Some(task) = state.task.as_ref()
        {
            let rig = match active {
                Some(rig) => Some(rig.clone()),
                None => match self.ctx.rigs.build(task, state) {
                    Ok(rig) => Some(rig),
                    Err(e) => {
                        error!(error = %e, "Cannot reach hardware to restore it");
                        None
                    }
                },
            };

            if let Some(rig) = rig {
                if let Some(original) = state.restore_target() {
                    match rig
                        .voltage
                        .set_voltage(&task.voltage_rail_name, task.asic_package, original)
                        .await
                    {
                        Ok(()) => info!(
                            rail = %task.voltage_rail_name,
                            volts = original,
                            "Restored original voltage"
                        ),
                        Err(e) => error!(error = %e, "Failed to restore original voltage"),
                    }
                }
                for (clock, value) in &state.default_clock {
                    if let Err(e) = rig
                        .clock
                        .set_clock(clock, *value, Selector::All, Selector::All)
                        .await
                    {
                        error!(clock = %clock, error = %e, "Failed to restore default clock");
                    }
                }
                if let Err(e) = rig.workload.stop().await {
                    error!(error = %e, "Failed to stop workload");
                }
            }
        }

        if let Err(e) = self.ctx.watchdog.stop().await {
            error!(error = %e, "Failed to stop watchdog");
        }
        if let Err(e) = self.ctx.autostart.remove() {
            error!(error = %e, "Failed to remove autostart entry");
        }
        if exhausted {
            match self.ctx.store.delete() {
                Ok(()) => info!("All tasks done; session checkpoint removed"),
                Err(e) => error!(error = %e, "Failed to remove session checkpoint"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::MemoryStore;

    fn connection() -> ConnectionParams {
        ConnectionParams {
            server_ip: Some("10.0.0.1".into()),
            wombat_ip: Some("10.0.0.2".into()),
            client_ip: None,
        }
    }

    #[test]
    fn test_fresh_start_requires_server_and_peer() {
        let store = MemoryStore::new();
        let request = StartRequest {
            fresh: true,
            ..Default::default()
        };
        let err = resolve_state(&store, &request).unwrap_err();
        assert!(matches!(err, VminError::Configuration(_)));
        assert!(err.to_string().contains("server_ip, wombat_ip"));
    }

    #[test]
    fn test_fresh_start_absolutizes_paths() {
        let store = MemoryStore::new();
        let request = StartRequest {
            fresh: true,
            connection: connection(),
            task_file: Some(PathBuf::from("lab/tasks.csv")),
            diag_folder: None,
        };
        let state = resolve_state(&store, &request).unwrap();
        assert!(state.task_file.is_absolute());
        assert!(state.task_file.ends_with("lab/tasks.csv"));
        assert_eq!(state.diag_folder, PathBuf::from(DEFAULT_DIAG_FOLDER));
        assert_eq!(state.task_index, 0);
    }

    #[test]
    fn test_resume_without_checkpoint_fails() {
        let store = MemoryStore::new();
        let err = resolve_state(&store, &StartRequest::default()).unwrap_err();
        assert!(err.to_string().contains("No saved session"));
    }

    #[test]
    fn test_resume_keeps_progress_and_applies_overrides() {
        let mut saved = SessionState::new(
            connection(),
            PathBuf::from("/lab/tasks.csv"),
            PathBuf::from("/lab/diag"),
        );
        saved.task_index = 3;
        let store = MemoryStore::new().with_state(saved);

        let request = StartRequest {
            connection: ConnectionParams {
                server_ip: Some("10.0.0.9".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let state = resolve_state(&store, &request).unwrap();
        assert_eq!(state.task_index, 3);
        assert_eq!(state.connection.server_ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(state.connection.wombat_ip.as_deref(), Some("10.0.0.2"));
    }
}
