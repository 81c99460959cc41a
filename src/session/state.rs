use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;
use vmin_common::{SearchPhase, TaskDescriptor, duration_secs};

/// Addresses of the watchdog service and this host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<String>,
    /// Peer that physically power-cycles the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wombat_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
}

impl ConnectionParams {
    /// Server and peer are mandatory; the client address is optional.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.server_ip.as_deref().is_none_or(str::is_empty) {
            missing.push("server_ip");
        }
        if self.wombat_ip.as_deref().is_none_or(str::is_empty) {
            missing.push("wombat_ip");
        }
        missing
    }
}

/// One named value recorded for the active task (e.g. `vmin_phase1`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedResult {
    pub name: String,
    pub value: f64,
}

/// The single source of truth for a characterization session.
///
/// Everything needed to resume after a watchdog reboot lives here and is
/// checkpointed after every hardware-affecting step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: Uuid,
    /// Row position in the task source; survives restarts
    pub task_index: usize,
    pub phase: SearchPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_voltage: Option<f64>,
    /// `current_voltage` has been written to the rail
    #[serde(default)]
    pub voltage_applied: bool,
    #[serde(default)]
    pub last_passing_voltage: BTreeMap<String, f64>,
    /// Restore target per package; written once per task
    #[serde(default)]
    pub original_voltage: BTreeMap<String, f64>,
    /// Last value confirmed from hardware per package
    #[serde(default)]
    pub actual_voltage: BTreeMap<String, f64>,
    /// Baseline clocks captured before any override, kept across tasks
    #[serde(default)]
    pub default_clock: BTreeMap<String, f64>,
    /// Calibrated heartbeat gap in seconds; 0 until measured
    #[serde(default)]
    pub watchdog_timeout: f64,
    #[serde(default)]
    pub task_done: bool,
    #[serde(default)]
    pub results: Vec<NamedResult>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub connection: ConnectionParams,
    pub task_file: PathBuf,
    pub diag_folder: PathBuf,
}

impl SessionState {
    /// Fresh session at cold start: first row, nothing in flight.
    pub fn new(connection: ConnectionParams, task_file: PathBuf, diag_folder: PathBuf) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            task_index: 0,
            phase: SearchPhase::NotStarted,
            task: None,
            current_voltage: None,
            voltage_applied: false,
            last_passing_voltage: BTreeMap::new(),
            original_voltage: BTreeMap::new(),
            actual_voltage: BTreeMap::new(),
            default_clock: BTreeMap::new(),
            watchdog_timeout: 0.0,
            task_done: false,
            results: Vec::new(),
            start_time: Utc::now(),
            connection,
            task_file,
            diag_folder,
        }
    }

    /// Load a freshly pulled task. Only valid while nothing is in flight.
    pub fn begin_task(&mut self, task: TaskDescriptor) {
        self.clear_search();
        self.task = Some(task);
        self.start_time = Utc::now();
    }

    /// Reset search fields after a task completes and move to the next row.
    pub fn finish_task(&mut self) {
        self.clear_search();
        self.task = None;
        self.task_index += 1;
    }

    fn clear_search(&mut self) {
        self.phase = SearchPhase::NotStarted;
        self.current_voltage = None;
        self.voltage_applied = false;
        self.last_passing_voltage.clear();
        self.original_voltage.clear();
        self.actual_voltage.clear();
        self.watchdog_timeout = 0.0;
        self.task_done = false;
        self.results.clear();
    }

    pub fn task(&self) -> Result<&TaskDescriptor> {
        self.task
            .as_ref()
            .ok_or_else(|| anyhow!("No task loaded (phase {})", self.phase))
    }

    pub fn current_voltage(&self) -> Result<f64> {
        self.current_voltage
            .ok_or_else(|| anyhow!("No current voltage recorded (phase {})", self.phase))
    }

    /// Queue the next voltage to try. It counts as applied only once the
    /// rail has been set.
    pub fn set_target(&mut self, volts: f64) {
        self.current_voltage = Some(volts);
        self.voltage_applied = false;
    }

    pub fn record_result(&mut self, name: &str, value: f64) {
        self.results.push(NamedResult {
            name: name.to_string(),
            value,
        });
    }

    pub fn result(&self, name: &str) -> Option<f64> {
        self.results.iter().find(|r| r.name == name).map(|r| r.value)
    }

    /// Original restore target for the active task's package, if captured.
    pub fn restore_target(&self) -> Option<f64> {
        let key = self.task.as_ref()?.package_key();
        self.original_voltage.get(&key).copied()
    }

    /// Heartbeat gap to use before a workload run, if calibrated.
    pub fn calibrated_timeout(&self) -> Option<Duration> {
        (self.watchdog_timeout > 0.0).then(|| duration_secs(self.watchdog_timeout))
    }

    pub fn duration(&self) -> chrono::Duration {
        Utc::now() - self.start_time
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rail = self
            .task
            .as_ref()
            .map(|t| t.voltage_rail_name.as_str())
            .unwrap_or("-");
        let voltage = self
            .current_voltage
            .map(|v| format!("{:.6}", v))
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "Vrail: {}, Phase: {}, current_voltage: {}, Duration: {}s, Row: {}",
            rail,
            self.phase.number(),
            voltage,
            self.duration().num_seconds(),
            self.task_index
        )
    }
}
