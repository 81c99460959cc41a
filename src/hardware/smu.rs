use async_trait::async_trait;
use std::time::Duration;
use vmin_common::{HardwareError, Selector, VoltageBackend};

use super::tool::ToolCommand;

/// Write-only rail control through the SMU voltage utility.
///
/// Invoked as `<smu_cmd> set <rail> <volts>`. The rail cannot be read back,
/// so the restore target is derived from the task's starting voltage.
#[derive(Debug, Clone)]
pub struct SmuBackend {
    tool: ToolCommand,
}

impl SmuBackend {
    pub fn new(command: &str, timeout: Duration) -> Self {
        Self {
            tool: ToolCommand::new(command, timeout),
        }
    }
}

#[async_trait]
impl VoltageBackend for SmuBackend {
    fn name(&self) -> &'static str {
        "smu"
    }

    async fn set_voltage(
        &self,
        rail: &str,
        _package: Selector,
        volts: f64,
    ) -> Result<(), HardwareError> {
        if volts <= 0.0 {
            return Err(HardwareError::Rejected {
                rail: rail.to_string(),
                volts,
                reason: "voltage must be positive".to_string(),
            });
        }
        self.tool
            .run(&["set".to_string(), rail.to_string(), format!("{:.6}", volts)])
            .await?;
        Ok(())
    }

    async fn get_voltage(
        &self,
        _rail: &str,
        _package: Selector,
    ) -> Result<Option<f64>, HardwareError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_smu_cannot_read_back() {
        let backend = SmuBackend::new("/nonexistent/smu_voltage", Duration::from_secs(1));
        assert_eq!(
            backend.get_voltage("VDDCR_SOC", Selector::All).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_smu_rejects_non_positive_voltage() {
        let backend = SmuBackend::new("/nonexistent/smu_voltage", Duration::from_secs(1));
        let err = backend
            .set_voltage("VDDCR_SOC", Selector::All, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, HardwareError::Rejected { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_smu_set_invokes_tool() {
        let backend = SmuBackend::new("true", Duration::from_secs(5));
        backend
            .set_voltage("VDDCR_SOC", Selector::All, 0.9)
            .await
            .unwrap();
    }
}
