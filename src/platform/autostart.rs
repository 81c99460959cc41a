use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::Autostart;

const ENTRY_NAME: &str = "vmin";

/// Startup entry that relaunches `vmin --data-dir <dir> run`.
///
/// Linux gets an XDG `.desktop` file under `~/.config/autostart`, Windows a
/// `.cmd` script in the user's Startup folder.
pub struct LauncherAutostart {
    entry: PathBuf,
    command: String,
}

impl LauncherAutostart {
    /// Entry in the platform's default autostart location.
    pub fn for_current_exe(data_dir: &Path) -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to resolve vmin executable")?;
        let config = dirs::config_dir().context("No user config directory on this host")?;
        Ok(Self::new(&Self::default_dir(&config), &exe, data_dir))
    }

    pub fn new(autostart_dir: &Path, exe: &Path, data_dir: &Path) -> Self {
        let command = format!(
            "\"{}\" --data-dir \"{}\" run",
            exe.display(),
            data_dir.display()
        );
        Self {
            entry: autostart_dir.join(Self::file_name()),
            command,
        }
    }

    #[cfg(windows)]
    fn default_dir(config: &Path) -> PathBuf {
        config.join("Microsoft\\Windows\\Start Menu\\Programs\\Startup")
    }

    #[cfg(not(windows))]
    fn default_dir(config: &Path) -> PathBuf {
        config.join("autostart")
    }

    #[cfg(windows)]
    fn file_name() -> String {
        format!("{}.cmd", ENTRY_NAME)
    }

    #[cfg(not(windows))]
    fn file_name() -> String {
        format!("{}.desktop", ENTRY_NAME)
    }

    #[cfg(windows)]
    fn contents(&self) -> String {
        format!("@echo off\r\n{}\r\n", self.command)
    }

    #[cfg(not(windows))]
    fn contents(&self) -> String {
        format!(
            "[Desktop Entry]\nType=Application\nName=vmin\nComment=Resume Vmin characterization\nExec={}\nTerminal=true\nX-GNOME-Autostart-enabled=true\n",
            self.command
        )
    }

    pub fn entry(&self) -> &Path {
        &self.entry
    }
}

impl Autostart for LauncherAutostart {
    fn register(&self) -> Result<()> {
        if let Some(dir) = self.entry.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        fs::write(&self.entry, self.contents())
            .with_context(|| format!("Failed to write {}", self.entry.display()))?;
        info!(entry = %self.entry.display(), "Registered autostart");
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        if self.entry.exists() {
            fs::remove_file(&self.entry)
                .with_context(|| format!("Failed to remove {}", self.entry.display()))?;
            info!(entry = %self.entry.display(), "Removed autostart");
        } else {
            debug!("No autostart entry to remove");
        }
        Ok(())
    }

    fn is_registered(&self) -> bool {
        self.entry.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_register_and_remove() {
        let dir = tempdir().unwrap();
        let autostart = LauncherAutostart::new(
            dir.path(),
            Path::new("/usr/local/bin/vmin"),
            Path::new("/lab/.vmin"),
        );
        assert!(!autostart.is_registered());

        autostart.register().unwrap();
        assert!(autostart.is_registered());
        let content = fs::read_to_string(autostart.entry()).unwrap();
        assert!(content.contains("--data-dir \"/lab/.vmin\" run"));

        // Registering twice just rewrites the entry.
        autostart.register().unwrap();

        autostart.remove().unwrap();
        assert!(!autostart.is_registered());
        autostart.remove().unwrap();
    }

    #[cfg(not(windows))]
    #[test]
    fn test_desktop_entry_format() {
        let dir = tempdir().unwrap();
        let autostart =
            LauncherAutostart::new(dir.path(), Path::new("/opt/vmin"), Path::new("/data"));
        assert!(autostart.entry().ends_with("vmin.desktop"));
        let content = autostart.contents();
        assert!(content.starts_with("[Desktop Entry]"));
        assert!(content.contains("Exec=\"/opt/vmin\" --data-dir \"/data\" run"));
    }
}
