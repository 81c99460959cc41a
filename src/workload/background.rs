use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vmin_common::{Outcome, TaskDescriptor};

use super::{WorkloadMode, WorkloadRunner};
use crate::errors::{VminError, VminResult};

/// Long-running workload started once and left alone.
///
/// A hang at low voltage is caught by the watchdog reboot, so every `run`
/// reports `Indeterminate`.
pub struct BackgroundApp {
    folder: PathBuf,
    child: Mutex<Option<Child>>,
}

impl BackgroundApp {
    pub fn new(folder: PathBuf) -> Self {
        Self {
            folder,
            child: Mutex::new(None),
        }
    }

    fn shell(command: &str) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }

    pub async fn is_running(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

#[async_trait]
impl WorkloadRunner for BackgroundApp {
    fn mode(&self) -> WorkloadMode {
        WorkloadMode::Background
    }

    async fn run(&self, task: &TaskDescriptor) -> VminResult<Outcome> {
        let Some(workload) = task.workload.as_deref().filter(|w| !w.trim().is_empty()) else {
            warn!(task = %task.id, "No workload configured; nothing to start");
            return Ok(Outcome::Indeterminate);
        };

        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut()
            && matches!(child.try_wait(), Ok(None))
        {
            debug!(workload, "Background workload already running");
            return Ok(Outcome::Indeterminate);
        }

        let mut cmd = Self::shell(workload);
        if self.folder.is_dir() {
            cmd.current_dir(&self.folder);
        }
        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VminError::Diagnostic(format!("Failed to start {}: {}", workload, e)))?;

        info!(workload, pid = child.id(), "Started background workload");
        *guard = Some(child);
        Ok(Outcome::Indeterminate)
    }

    async fn stop(&self) -> VminResult<()> {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!(%status, "Background workload had already exited");
            return Ok(());
        }
        child
            .kill()
            .await
            .map_err(|e| VminError::Diagnostic(format!("Failed to stop workload: {}", e)))?;
        info!("Stopped background workload");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::sample_task;

    #[tokio::test]
    async fn test_missing_workload_is_indeterminate() {
        let app = BackgroundApp::new(PathBuf::from("."));
        let mut task = sample_task("1");
        task.workload = Some("  ".into());
        assert_eq!(app.run(&task).await.unwrap(), Outcome::Indeterminate);
        assert!(!app.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_without_child_is_noop() {
        let app = BackgroundApp::new(PathBuf::from("."));
        app.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_then_stop_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let app = BackgroundApp::new(dir.path().to_path_buf());
        let mut task = sample_task("1");
        task.workload = Some("sleep 30".into());

        assert_eq!(app.run(&task).await.unwrap(), Outcome::Indeterminate);
        assert!(app.is_running().await);

        // A second run must not spawn a second process.
        app.run(&task).await.unwrap();

        app.stop().await.unwrap();
        assert!(!app.is_running().await);
    }
}
