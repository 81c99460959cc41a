use anyhow::{Context, anyhow};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::state::SessionState;
use crate::errors::{VminError, VminResult};

/// Durable checkpoint of the whole session.
pub trait PersistentStore: Send + Sync {
    fn save(&self, state: &SessionState) -> VminResult<()>;

    /// `None` when no checkpoint exists.
    fn load(&self) -> VminResult<Option<SessionState>>;

    fn delete(&self) -> VminResult<()>;
}

/// JSON checkpoint file replaced atomically on every save.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn checkpoint_error(&self, source: anyhow::Error) -> VminError {
        VminError::Checkpoint {
            path: self.path.clone(),
            source,
        }
    }

    fn write_atomically(&self, contents: &[u8]) -> anyhow::Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            file.write_all(contents)
                .context("Failed to write checkpoint")?;
            // The rename below is only crash-safe once the bytes are on disk.
            file.sync_all().context("Failed to flush checkpoint")?;
        }
        fs::rename(&tmp, &self.path).context("Failed to replace checkpoint")?;
        if let Some(dir) = self.path.parent()
            && let Ok(handle) = File::open(dir)
        {
            let _ = handle.sync_all();
        }
        Ok(())
    }
}

impl PersistentStore for FileStore {
    fn save(&self, state: &SessionState) -> VminResult<()> {
        let json = serde_json::to_vec_pretty(state)
            .context("Failed to serialize session state")
            .map_err(|e| self.checkpoint_error(e))?;
        self.write_atomically(&json)
            .map_err(|e| self.checkpoint_error(e))
    }

    fn load(&self) -> VminResult<Option<SessionState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .context("Failed to read checkpoint")
            .map_err(|e| self.checkpoint_error(e))?;
        let state = serde_json::from_str(&content)
            .context("Failed to parse checkpoint")
            .map_err(|e| self.checkpoint_error(e))?;
        Ok(Some(state))
    }

    fn delete(&self) -> VminResult<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .context("Failed to remove checkpoint")
                .map_err(|e| self.checkpoint_error(e))?;
        }
        Ok(())
    }
}

/// Exclusive lock that keeps two runners off the same session.
/// Released when dropped.
#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    pub fn acquire(path: &Path) -> VminResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            VminError::configuration(format!(
                "Another vmin process holds the session lock at {}",
                path.display()
            ))
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Load a checkpoint or explain how to start one.
pub fn load_required(store: &dyn PersistentStore) -> VminResult<SessionState> {
    store.load()?.ok_or_else(|| {
        VminError::Other(anyhow!(
            "No saved session found. Start a new one with 'vmin run --start'"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionParams;
    use crate::sim::sample_task;
    use tempfile::tempdir;
    use vmin_common::SearchPhase;

    fn make_store() -> (FileStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vmin_data.json");
        (FileStore::new(path), dir)
    }

    fn session() -> SessionState {
        SessionState::new(
            ConnectionParams {
                server_ip: Some("10.0.0.1".into()),
                wombat_ip: Some("10.0.0.2".into()),
                client_ip: None,
            },
            PathBuf::from("/lab/vmin_tasks.csv"),
            PathBuf::from("/lab/diag"),
        )
    }

    #[test]
    fn test_load_without_checkpoint_returns_none() {
        let (store, _dir) = make_store();
        assert!(store.load().unwrap().is_none());
        assert!(load_required(&store).is_err());
    }

    #[test]
    fn test_recovery_after_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vmin_data.json");

        let mut state = session();
        state.begin_task(sample_task("7"));
        state.phase = SearchPhase::Phase1;
        state.current_voltage = Some(0.8);
        state.original_voltage.insert("0".into(), 0.95);
        state.last_passing_voltage.insert("0".into(), 0.85);

        {
            let store = FileStore::new(path.clone());
            store.save(&state).unwrap();
        }

        {
            let store = FileStore::new(path.clone());
            let restored = store.load().unwrap().unwrap();
            assert_eq!(restored, state);
            assert_eq!(restored.phase, SearchPhase::Phase1);
            assert_eq!(restored.task().unwrap().id, "7");
        }
    }

    #[test]
    fn test_save_replaces_previous_checkpoint() {
        let (store, dir) = make_store();
        let mut state = session();
        store.save(&state).unwrap();
        state.task_index = 4;
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap().unwrap().task_index, 4);
        assert!(!dir.path().join("vmin_data.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_checkpoint_is_reported() {
        let (store, _dir) = make_store();
        fs::write(store.path(), "{ not json").unwrap();
        let err = store.load().unwrap_err();
        assert!(matches!(err, VminError::Checkpoint { .. }));
        assert!(err.to_string().contains("vmin_data.json"));
    }

    #[test]
    fn test_delete_removes_file_and_is_idempotent() {
        let (store, _dir) = make_store();
        store.save(&session()).unwrap();
        store.delete().unwrap();
        assert!(!store.path().exists());
        store.delete().unwrap();
    }

    #[test]
    fn test_session_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vmin_data.lock");
        let first = SessionLock::acquire(&path).unwrap();
        let second = SessionLock::acquire(&path);
        assert!(matches!(second, Err(VminError::Configuration(_))));
        drop(first);
        assert!(SessionLock::acquire(&path).is_ok());
    }
}
