//! OS integration: relaunching the runner after a reboot.

pub mod autostart;

use anyhow::Result;

pub use autostart::LauncherAutostart;

/// Registration that makes the OS start `vmin run` after a reboot.
/// Real implementation: `LauncherAutostart`. Test double: `SimAutostart`.
pub trait Autostart: Send + Sync {
    /// Idempotent; re-registering overwrites the previous entry.
    fn register(&self) -> Result<()>;

    /// No-op when nothing is registered.
    fn remove(&self) -> Result<()>;

    fn is_registered(&self) -> bool;
}
