//! Workload execution.
//!
//! Two execution models exist:
//! - `Synchronous`: a diagnostic harness runs to completion and reports an
//!   explicit pass/fail (`DiagHarness`)
//! - `Background`: a long-running application is started and left alone;
//!   only the absence of a watchdog reboot signals a pass (`BackgroundApp`)

pub mod background;
pub mod calibration;
pub mod diag;

use async_trait::async_trait;
use vmin_common::{Outcome, TaskDescriptor};

use crate::errors::VminResult;

pub use background::BackgroundApp;
pub use calibration::TimeoutCalibrator;
pub use diag::{DiagClassifier, DiagHarness, DiagReport, DiagSummary, StrictClassifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadMode {
    /// Each invocation blocks and yields Pass or Fail
    Synchronous,
    /// One invocation starts a process that keeps running until `stop`
    Background,
}

impl std::fmt::Display for WorkloadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadMode::Synchronous => write!(f, "synchronous"),
            WorkloadMode::Background => write!(f, "background"),
        }
    }
}

/// Abstraction over workload execution for testability.
/// Real implementations: `DiagHarness`, `BackgroundApp`. Test double: `SimWorkload`.
#[async_trait]
pub trait WorkloadRunner: Send + Sync {
    fn mode(&self) -> WorkloadMode;

    /// Run (or start) the task's workload once.
    ///
    /// A harness invocation failure is an `Err(VminError::Diagnostic)`, which
    /// callers treat as a failing result rather than a crash.
    async fn run(&self, task: &TaskDescriptor) -> VminResult<Outcome>;

    /// Terminate a running background workload. No-op when nothing runs.
    async fn stop(&self) -> VminResult<()>;
}
