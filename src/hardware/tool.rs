use regex::Regex;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;
use vmin_common::HardwareError;

static LABELLED_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)[:=]\s*(-?\d+(?:\.\d+)?)").expect("valid number regex")
});

static BARE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(-?\d+(?:\.\d+)?)\s*$").expect("valid number regex")
});

/// One external control tool invoked per operation with a hard timeout.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    base_args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// `command` may carry fixed leading arguments (`"sudo atitool"`).
    pub fn new(command: &str, timeout: Duration) -> Self {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        Self {
            program,
            base_args: parts.collect(),
            timeout,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub async fn run(&self, args: &[String]) -> Result<String, HardwareError> {
        debug!(tool = %self.program, ?args, "Invoking hardware tool");
        let child = Command::new(&self.program)
            .args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HardwareError::Launch {
                tool: self.program.clone(),
                source,
            })?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| HardwareError::Launch {
                tool: self.program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(HardwareError::Timeout {
                    tool: self.program.clone(),
                    secs: self.timeout.as_secs_f64(),
                });
            }
        };

        if !output.status.success() {
            return Err(HardwareError::ToolFailed {
                tool: self.program.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Extract the reported value from tool output.
///
/// Prefers the last `label: value` / `label=value` pair and falls back to
/// a line holding nothing but a number.
pub fn parse_number(output: &str) -> Option<f64> {
    LABELLED_NUMBER
        .captures_iter(output)
        .last()
        .or_else(|| BARE_NUMBER.captures_iter(output).last())
        .and_then(|caps| caps[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labelled_value() {
        assert_eq!(parse_number("VDDCR_SOC voltage: 0.950000 V"), Some(0.95));
        assert_eq!(parse_number("pkg 0\nsclk=1800\n"), Some(1800.0));
    }

    #[test]
    fn test_parse_last_labelled_value_wins() {
        assert_eq!(parse_number("requested: 1.0\nactual: 0.9875\n"), Some(0.9875));
    }

    #[test]
    fn test_parse_bare_number() {
        assert_eq!(parse_number("0.85\n"), Some(0.85));
        assert_eq!(parse_number("no value here"), None);
    }

    #[test]
    fn test_command_keeps_leading_args() {
        let tool = ToolCommand::new("sudo atitool", Duration::from_secs(2));
        assert_eq!(tool.program(), "sudo");
        assert_eq!(tool.base_args, vec!["atitool"]);
    }

    #[tokio::test]
    async fn test_missing_tool_is_launch_error() {
        let tool = ToolCommand::new("/nonexistent/atitool", Duration::from_secs(2));
        let err = tool.run(&[]).await.unwrap_err();
        assert!(matches!(err, HardwareError::Launch { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_tool_failure() {
        let tool = ToolCommand::new("sh -c", Duration::from_secs(5));
        let err = tool
            .run(&["echo boom >&2; exit 3".to_string()])
            .await
            .unwrap_err();
        match err {
            HardwareError::ToolFailed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("Expected ToolFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_tool_times_out() {
        let tool = ToolCommand::new("sleep", Duration::from_millis(100));
        let err = tool.run(&["5".to_string()]).await.unwrap_err();
        assert!(matches!(err, HardwareError::Timeout { .. }));
    }
}
