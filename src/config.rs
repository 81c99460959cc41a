use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::vmin_config::{VminToml, WorkloadModeSetting};
use crate::workload::WorkloadMode;

/// Name under which the session checkpoint is stored.
pub const SESSION_NAME: &str = "vmin_data";
pub const DEFAULT_DATA_DIR: &str = ".vmin";
pub const DEFAULT_TASK_FILE: &str = "vmin_tasks.csv";
pub const DEFAULT_DIAG_FOLDER: &str = "/root/amddiag/apu/slt/diag/";

/// Runtime configuration for vmin.
///
/// Resolves every on-disk location from the data directory and carries the
/// parsed `vmin.toml` settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
    pub results_file: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    pub settings: VminToml,
}

impl Config {
    pub fn new(data_dir: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let data_dir = data_dir
            .canonicalize()
            .context("Failed to resolve data directory")?;

        let settings = VminToml::load_or_default(&data_dir)?;

        Ok(Self {
            state_file: data_dir.join(format!("{}.json", SESSION_NAME)),
            lock_file: data_dir.join(format!("{}.lock", SESSION_NAME)),
            results_file: data_dir.join("results.csv"),
            log_dir: data_dir.join("logs"),
            data_dir,
            verbose,
            settings,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// Resolve the configured workload mode against the host OS.
    pub fn workload_mode(&self) -> WorkloadMode {
        match self.settings.tools.workload_mode {
            WorkloadModeSetting::Diag => WorkloadMode::Synchronous,
            WorkloadModeSetting::Background => WorkloadMode::Background,
            WorkloadModeSetting::Auto if cfg!(target_os = "linux") => WorkloadMode::Synchronous,
            WorkloadModeSetting::Auto => WorkloadMode::Background,
        }
    }

    /// Make a user-supplied path absolute so it survives a relaunch from a
    /// different working directory.
    pub fn absolutize(path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Ok(cwd.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_config_paths_live_in_data_dir() {
        let dir = tempdir().unwrap();
        let config = Config::new(Some(dir.path().to_path_buf()), false).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.data_dir, root);
        assert_eq!(config.state_file, root.join("vmin_data.json"));
        assert_eq!(config.lock_file, root.join("vmin_data.lock"));
        assert_eq!(config.results_file, root.join("results.csv"));
    }

    #[test]
    fn test_config_creates_missing_data_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("lab/run1");
        let config = Config::new(Some(nested.clone()), true).unwrap();
        assert!(nested.exists());
        assert!(config.verbose);
        config.ensure_directories().unwrap();
        assert!(config.log_dir.exists());
    }

    #[test]
    fn test_config_reads_vmin_toml() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("vmin.toml"),
            "[search]\nmax_voltage = 1.1\n[tools]\nworkload_mode = \"diag\"\n",
        )
        .unwrap();
        let config = Config::new(Some(dir.path().to_path_buf()), false).unwrap();
        assert_eq!(config.settings.search.max_voltage, 1.1);
        assert_eq!(config.workload_mode(), WorkloadMode::Synchronous);
    }

    #[test]
    fn test_config_rejects_broken_toml() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("vmin.toml"), "[search\n").unwrap();
        assert!(Config::new(Some(dir.path().to_path_buf()), false).is_err());
    }

    #[test]
    fn test_absolutize_keeps_absolute_paths() {
        let abs = PathBuf::from("/lab/tasks.csv");
        assert_eq!(Config::absolutize(&abs).unwrap(), abs);
        let rel = Config::absolutize(Path::new("tasks.csv")).unwrap();
        assert!(rel.is_absolute());
        assert!(rel.ends_with("tasks.csv"));
    }
}
