//! Typed error hierarchy for the vmin runner.
//!
//! `VminError` is what crosses the top-level error boundary. Each variant
//! maps to one class of fatal condition:
//! - configuration and task-source problems abort before hardware is touched
//! - hardware faults end the run and trigger teardown
//! - diagnostic harness failures are turned into `Fail` outcomes by the engine
//!   and only surface here when they happen outside a search

use std::path::PathBuf;
use thiserror::Error;
use vmin_common::HardwareError;

/// Exit code for normal exhaustion of the task queue.
pub const EXIT_DONE: i32 = 0;
/// Exit code when the task source is missing at the moment a task is needed.
pub const EXIT_TASK_SOURCE_MISSING: i32 = 1;
/// Exit code for every other unrecovered fatal error.
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Error)]
pub enum VminError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Task source does not exist: {path}")]
    TaskSourceMissing { path: PathBuf },

    #[error("Invalid task row {row} ({column}): {message}")]
    InvalidTask {
        row: usize,
        column: String,
        message: String,
    },

    #[error("Hardware backend error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Diagnostic harness error: {0}")]
    Diagnostic(String),

    #[error("Checkpoint error at {path}: {source}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VminError {
    pub fn configuration(message: impl Into<String>) -> Self {
        VminError::Configuration(message.into())
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            VminError::TaskSourceMissing { .. } => EXIT_TASK_SOURCE_MISSING,
            _ => EXIT_FATAL,
        }
    }

    /// Faults that warrant the pause-and-log treatment of the error boundary.
    /// Configuration problems and a missing task source are expected exits.
    pub fn is_unexpected(&self) -> bool {
        !matches!(
            self,
            VminError::Configuration(_) | VminError::TaskSourceMissing { .. }
        )
    }
}

pub type VminResult<T> = std::result::Result<T, VminError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_source_missing_exits_with_one() {
        let err = VminError::TaskSourceMissing {
            path: PathBuf::from("/lab/vmin_tasks.csv"),
        };
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("vmin_tasks.csv"));
        assert!(!err.is_unexpected());
    }

    #[test]
    fn hardware_error_converts_and_is_fatal() {
        let hw = HardwareError::Timeout {
            tool: "atitool".into(),
            secs: 2.0,
        };
        let err: VminError = hw.into();
        match &err {
            VminError::Hardware(HardwareError::Timeout { tool, .. }) => {
                assert_eq!(tool, "atitool")
            }
            _ => panic!("Expected VminError::Hardware(Timeout)"),
        }
        assert_eq!(err.exit_code(), EXIT_FATAL);
        assert!(err.is_unexpected());
    }

    #[test]
    fn configuration_error_carries_message() {
        let err = VminError::configuration("Need valid server and wombat ip");
        assert!(matches!(err, VminError::Configuration(_)));
        assert!(err.to_string().contains("wombat"));
        assert_eq!(err.exit_code(), EXIT_FATAL);
        assert!(!err.is_unexpected());
    }

    #[test]
    fn invalid_task_names_row_and_column() {
        let err = VminError::InvalidTask {
            row: 3,
            column: "starting_voltage".into(),
            message: "not a number".into(),
        };
        let text = err.to_string();
        assert!(text.contains("row 3"));
        assert!(text.contains("starting_voltage"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&VminError::Diagnostic("harness missing".into()));
        assert_std_error(&HardwareError::NotReady { attempts: 3 });
    }
}
