//! `vmin run`: wire the real collaborators together and drive a session.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use vmin::config::Config;
use vmin::errors::EXIT_DONE;
use vmin::hardware::ToolRigFactory;
use vmin::logging;
use vmin::platform::{Autostart, LauncherAutostart};
use vmin::recovery::{StartRequest, resolve_state};
use vmin::results::CsvResultSink;
use vmin::runner::{SessionContext, run_session};
use vmin::session::{ConnectionParams, FileStore, SessionLock};
use vmin::sim::SimBench;
use vmin::watchdog::HttpWatchdog;

use super::super::{Cli, RunArgs};

/// Returns the process exit code.
pub async fn cmd_run(cli: &Cli, args: &RunArgs) -> Result<i32> {
    let config = Config::new(cli.data_dir.clone(), cli.verbose)?;
    config.ensure_directories()?;
    let _log_guard = logging::init(&config.log_dir, config.verbose)?;

    for warning in config.settings.validate() {
        warn!(%warning, "Suspicious setting in vmin.toml");
    }

    let _lock = match SessionLock::acquire(&config.lock_file) {
        Ok(lock) => lock,
        Err(e) => {
            error!(error = %e, "Cannot lock session");
            return Ok(e.exit_code());
        }
    };

    let store = Arc::new(FileStore::new(config.state_file.clone()));
    let autostart = Arc::new(LauncherAutostart::for_current_exe(&config.data_dir)?);

    let request = StartRequest {
        fresh: args.start,
        connection: ConnectionParams {
            server_ip: args.server_ip.clone(),
            wombat_ip: args.wombat_ip.clone(),
            client_ip: args.client_ip.clone(),
        },
        task_file: args.task_csv.clone(),
        diag_folder: args.diag_folder.clone(),
    };
    let state = match resolve_state(store.as_ref(), &request) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "Cannot start session");
            // A relaunch that can never succeed must not loop across reboots.
            if !request.fresh
                && let Err(err) = autostart.remove()
            {
                warn!(error = %err, "Failed to remove autostart entry");
            }
            return Ok(e.exit_code());
        }
    };

    // Both are present once resolve_state succeeds.
    let server = state.connection.server_ip.clone().unwrap_or_default();
    let peer = state.connection.wombat_ip.clone().unwrap_or_default();
    let watchdog = Arc::new(HttpWatchdog::new(
        &server,
        config.settings.watchdog.port,
        &peer,
        state.connection.client_ip.clone(),
        config.settings.watchdog.heartbeat_interval(),
    )?);

    let mode = config.workload_mode();
    info!(
        data_dir = %config.data_dir.display(),
        task_file = %state.task_file.display(),
        %mode,
        fresh = request.fresh,
        "Starting vmin session"
    );

    let ctx = SessionContext {
        store,
        watchdog,
        autostart,
        results: Arc::new(CsvResultSink::new(config.results_file.clone())),
        rigs: Arc::new(ToolRigFactory::new(
            config.settings.tools.clone(),
            mode,
            SimBench::from_settings(&config.settings.sim),
        )),
        settings: config.settings.clone(),
    };

    match run_session(&ctx, state).await {
        Ok(finished) => {
            info!(finished, results = %config.results_file.display(), "Session complete");
            Ok(EXIT_DONE)
        }
        Err(e) => {
            error!(error = %e, "Session ended with an error");
            Ok(e.exit_code())
        }
    }
}
