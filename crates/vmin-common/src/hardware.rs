//! Hardware capability traits.
//!
//! Real implementations live in the `vmin` crate (`AtitoolBackend`,
//! `SmuBackend`); the simulated rig implements the same traits for tests
//! and dry runs.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Selector;

/// Failure of a voltage or clock read/write.
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} timed out after {secs:.1}s")]
    Timeout { tool: String, secs: f64 },

    #[error("{tool} exited with code {code}: {stderr}")]
    ToolFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("Could not parse {what} from output: {output}")]
    Unparseable { what: String, output: String },

    #[error("No devices enumerated after {attempts} attempts")]
    NotReady { attempts: u32 },

    #[error("Rail {rail} rejected {volts:.6} V: {reason}")]
    Rejected {
        rail: String,
        volts: f64,
        reason: String,
    },
}

/// Set/get voltage on a named rail of a package.
#[async_trait]
pub trait VoltageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Block until the backend can accept commands.
    async fn wait_ready(&self) -> Result<(), HardwareError> {
        Ok(())
    }

    async fn set_voltage(
        &self,
        rail: &str,
        package: Selector,
        volts: f64,
    ) -> Result<(), HardwareError>;

    /// Current rail voltage, or `None` for backends that cannot read it back.
    async fn get_voltage(&self, rail: &str, package: Selector)
    -> Result<Option<f64>, HardwareError>;
}

/// Set/get a named clock on a package/die.
#[async_trait]
pub trait ClockBackend: Send + Sync {
    async fn set_clock(
        &self,
        clock: &str,
        value: f64,
        package: Selector,
        die: Selector,
    ) -> Result<(), HardwareError>;

    async fn get_clock(&self, clock: &str) -> Result<f64, HardwareError>;
}
