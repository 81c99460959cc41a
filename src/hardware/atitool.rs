use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};
use vmin_common::{ClockBackend, HardwareError, Selector, VoltageBackend};

use super::tool::{ToolCommand, parse_number};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);
const READY_MAX_ATTEMPTS: u32 = 300;

/// Rail and clock control through the `atitool` command line.
///
/// Argument convention:
/// - `-enumerate`
/// - `-setvoltage=<rail>,<volts> -pkg=<p>` / `-getvoltage=<rail> -pkg=<p>`
/// - `-setclk=<clock>,<value> -pkg=<p> -die=<d>` / `-getclk=<clock>`
#[derive(Debug, Clone)]
pub struct AtitoolBackend {
    tool: ToolCommand,
}

impl AtitoolBackend {
    pub fn new(command: &str, timeout: Duration) -> Self {
        Self {
            tool: ToolCommand::new(command, timeout),
        }
    }

    /// Number of devices the tool currently sees.
    pub async fn enumerate(&self) -> Result<usize, HardwareError> {
        let output = self.tool.run(&["-enumerate".to_string()]).await?;
        Ok(output.lines().filter(|l| !l.trim().is_empty()).count())
    }
}

#[async_trait]
impl VoltageBackend for AtitoolBackend {
    fn name(&self) -> &'static str {
        "atitool"
    }

    async fn wait_ready(&self) -> Result<(), HardwareError> {
        for attempt in 1..=READY_MAX_ATTEMPTS {
            match self.enumerate().await {
                Ok(count) if count > 0 => {
                    info!(devices = count, attempt, "atitool ready");
                    return Ok(());
                }
                Ok(_) => debug!(attempt, "atitool enumerated no devices yet"),
                Err(e) => debug!(attempt, error = %e, "atitool enumerate failed"),
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        Err(HardwareError::NotReady {
            attempts: READY_MAX_ATTEMPTS,
        })
    }

    async fn set_voltage(
        &self,
        rail: &str,
        package: Selector,
        volts: f64,
    ) -> Result<(), HardwareError> {
        self.tool
            .run(&[
                format!("-setvoltage={},{:.6}", rail, volts),
                format!("-pkg={}", package),
            ])
            .await?;
        Ok(())
    }

    async fn get_voltage(
        &self,
        rail: &str,
        package: Selector,
    ) -> Result<Option<f64>, HardwareError> {
        let output = self
            .tool
            .run(&[format!("-getvoltage={}", rail), format!("-pkg={}", package)])
            .await?;
        parse_number(&output)
            .map(Some)
            .ok_or_else(|| HardwareError::Unparseable {
                what: format!("{} voltage", rail),
                output: output.trim().to_string(),
            })
    }
}

#[async_trait]
impl ClockBackend for AtitoolBackend {
    async fn set_clock(
        &self,
        clock: &str,
        value: f64,
        package: Selector,
        die: Selector,
    ) -> Result<(), HardwareError> {
        self.tool
            .run(&[
                format!("-setclk={},{}", clock, value),
                format!("-pkg={}", package),
                format!("-die={}", die),
            ])
            .await?;
        Ok(())
    }

    async fn get_clock(&self, clock: &str) -> Result<f64, HardwareError> {
        let output = self.tool.run(&[format!("-getclk={}", clock)]).await?;
        parse_number(&output).ok_or_else(|| HardwareError::Unparseable {
            what: format!("{} clock", clock),
            output: output.trim().to_string(),
        })
    }
}
