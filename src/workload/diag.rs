//! Diagnostic harness runner.
//!
//! The harness is invoked as `<diag_cmd> <workload>` from the diagnostic
//! folder. Its output is read in two ways:
//! 1. A `RESULT: PASS` / `RESULT: FAIL` line is a raw verdict and wins.
//! 2. Otherwise every `[PASS] name` / `[FAIL] name` / `[SKIP] name` line is
//!    tallied into a `DiagSummary`, and a `DiagClassifier` decides.

use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};
use vmin_common::{Outcome, TaskDescriptor};

use super::{WorkloadMode, WorkloadRunner};
use crate::errors::{VminError, VminResult};

static RAW_VERDICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*result\s*[:=]\s*(pass|fail)\b").expect("valid verdict regex")
});

static TEST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*\[(pass|fail|skip)\]\s*(.*)$").expect("valid test line regex")
});

/// Tally of individual diagnostic tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagSummary {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagReport {
    Raw(bool),
    Summary(DiagSummary),
}

/// Parse harness output into a raw verdict or a test summary.
pub fn parse_report(output: &str) -> DiagReport {
    if let Some(caps) = RAW_VERDICT.captures_iter(output).last() {
        return DiagReport::Raw(caps[1].eq_ignore_ascii_case("pass"));
    }

    let mut summary = DiagSummary::default();
    for caps in TEST_LINE.captures_iter(output) {
        match caps[1].to_lowercase().as_str() {
            "pass" => summary.passed += 1,
            "fail" => {
                summary.failed += 1;
                summary.failures.push(caps[2].trim().to_string());
            }
            _ => summary.skipped += 1,
        }
    }
    DiagReport::Summary(summary)
}

/// Pass/fail policy for summarized diagnostic output.
pub trait DiagClassifier: Send + Sync {
    fn classify(&self, summary: &DiagSummary) -> Outcome;
}

/// Passes only when something passed and nothing failed.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictClassifier;

impl DiagClassifier for StrictClassifier {
    fn classify(&self, summary: &DiagSummary) -> Outcome {
        if summary.failed > 0 {
            Outcome::Fail
        } else if summary.passed > 0 {
            Outcome::Pass
        } else {
            Outcome::Indeterminate
        }
    }
}

pub struct DiagHarness {
    program: String,
    folder: PathBuf,
    classifier: Arc<dyn DiagClassifier>,
}

impl DiagHarness {
    pub fn new(program: &str, folder: PathBuf) -> Self {
        Self::with_classifier(program, folder, Arc::new(StrictClassifier))
    }

    pub fn with_classifier(
        program: &str,
        folder: PathBuf,
        classifier: Arc<dyn DiagClassifier>,
    ) -> Self {
        Self {
            program: program.to_string(),
            folder,
            classifier,
        }
    }

    fn judge(&self, report: &DiagReport) -> Outcome {
        match report {
            DiagReport::Raw(true) => Outcome::Pass,
            DiagReport::Raw(false) => Outcome::Fail,
            DiagReport::Summary(summary) => {
                if !summary.failures.is_empty() {
                    debug!(failures = ?summary.failures, "Failing diagnostic tests");
                }
                self.classifier.classify(summary)
            }
        }
    }
}

#[async_trait]
impl WorkloadRunner for DiagHarness {
    fn mode(&self) -> WorkloadMode {
        WorkloadMode::Synchronous
    }

    async fn run(&self, task: &TaskDescriptor) -> VminResult<Outcome> {
        let Some(workload) = task.workload.as_deref().filter(|w| !w.trim().is_empty()) else {
            warn!(task = %task.id, "No workload configured; counting as a failed run");
            return Ok(Outcome::Fail);
        };

        let mut parts = self.program.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| VminError::Diagnostic("diag command is empty".to_string()))?;

        info!(workload, folder = %self.folder.display(), "Running diagnostic");
        let started = Instant::now();
        let output = Command::new(program)
            .args(parts)
            .arg(workload)
            .current_dir(&self.folder)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                VminError::Diagnostic(format!("Failed to launch {}: {}", self.program, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = parse_report(&stdout);
        let outcome = self.judge(&report);
        info!(
            workload,
            exit_code = output.status.code().unwrap_or(-1),
            elapsed_secs = started.elapsed().as_secs_f64(),
            %outcome,
            "Diagnostic finished"
        );
        if !output.status.success() && outcome.is_pass() {
            warn!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Diagnostic reported pass but exited non-zero"
            );
        }
        Ok(outcome)
    }

    async fn stop(&self) -> VminResult<()> {
        Ok(())
    }
}
