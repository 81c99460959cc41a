use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Voltages are kept at micro-volt resolution so repeated stepping does not
/// accumulate binary rounding noise.
pub fn round_volts(volts: f64) -> f64 {
    (volts * 1_000_000.0).round() / 1_000_000.0
}

/// Addresses a package or a die: either every instance or one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Selector {
    #[default]
    All,
    Index(u32),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::All => write!(f, "all"),
            Selector::Index(i) => write!(f, "{}", i),
        }
    }
}

impl FromStr for Selector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return Ok(Selector::All);
        }
        // Spreadsheets like to write "0.0" for integer columns.
        if let Ok(value) = trimmed.parse::<f64>()
            && value >= 0.0
            && value.fract() == 0.0
        {
            return Ok(Selector::Index(value as u32));
        }
        anyhow::bail!("Invalid selector '{}'. Expected 'all' or a non-negative index", s)
    }
}

impl TryFrom<String> for Selector {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Selector> for String {
    fn from(value: Selector) -> Self {
        value.to_string()
    }
}

/// Which voltage-control backend drives the rail for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoltageModule {
    /// Read-back capable tool that also owns clock control
    Atitool,
    /// Write-only SMU rail control
    Smu,
    /// In-process simulated rig
    Sim,
}

impl fmt::Display for VoltageModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoltageModule::Atitool => write!(f, "atitool"),
            VoltageModule::Smu => write!(f, "smu"),
            VoltageModule::Sim => write!(f, "sim"),
        }
    }
}

impl FromStr for VoltageModule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "atitool" => Ok(VoltageModule::Atitool),
            "smu" => Ok(VoltageModule::Smu),
            "sim" => Ok(VoltageModule::Sim),
            _ => anyhow::bail!(
                "Invalid voltage module '{}'. Valid values: atitool, smu, sim",
                s
            ),
        }
    }
}

/// Where the search for the active task currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    /// No task in flight; safe to pull the next one
    #[default]
    NotStarted,
    /// Coarse decrement sweep
    Phase1,
    /// Confirmation with upward margin
    Phase2,
}

impl SearchPhase {
    pub fn number(&self) -> u8 {
        match self {
            SearchPhase::NotStarted => 0,
            SearchPhase::Phase1 => 1,
            SearchPhase::Phase2 => 2,
        }
    }

    pub fn in_flight(&self) -> bool {
        !matches!(self, SearchPhase::NotStarted)
    }
}

impl fmt::Display for SearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchPhase::NotStarted => write!(f, "idle"),
            SearchPhase::Phase1 => write!(f, "phase1"),
            SearchPhase::Phase2 => write!(f, "phase2"),
        }
    }
}

/// Result of one workload invocation.
///
/// `Indeterminate` is what a background workload reports: the only pass
/// signal is that the watchdog never had to reboot the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Indeterminate,
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pass => write!(f, "pass"),
            Outcome::Fail => write!(f, "fail"),
            Outcome::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// A requested clock value for the targeted package/die.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockOverride {
    pub name: String,
    pub value: f64,
}

/// Parameters of one characterization task, as loaded from the task source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: String,
    pub voltage_rail_name: String,
    #[serde(default)]
    pub asic_package: Selector,
    #[serde(default)]
    pub asic_die: Selector,
    pub voltage_module: VoltageModule,
    pub starting_voltage: f64,
    pub voltage_step: f64,
    /// Per-task ceiling; falls back to the configured maximum when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_voltage: Option<f64>,
    /// Seconds to dwell at each phase1 voltage
    pub phase1_duration: f64,
    /// Seconds to run the workload at each phase2 voltage
    pub phase2_duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<String>,
    /// Seconds to wait before launching the workload
    pub workload_delay: f64,
    pub diag_loops: u32,
    /// Per-call timeout for the hardware tool, in seconds
    pub atitool_timeout: f64,
    /// Every clock column the task source declares, in column order
    #[serde(default)]
    pub clock_names: Vec<String>,
    /// Clock columns that carry a value for this task
    #[serde(default)]
    pub adjust_clock: Vec<ClockOverride>,
    #[serde(default)]
    pub xcaptan: bool,
}

/// Seconds as a `Duration`, saturating instead of panicking on values a
/// `Duration` cannot hold.
pub fn duration_secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

impl TaskDescriptor {
    /// Key under which per-package voltages are recorded.
    pub fn package_key(&self) -> String {
        self.asic_package.to_string()
    }

    pub fn phase1_dwell(&self) -> Duration {
        duration_secs(self.phase1_duration.max(0.0))
    }

    pub fn phase2_dwell(&self) -> Duration {
        duration_secs(self.phase2_duration.max(0.0))
    }

    pub fn launch_delay(&self) -> Duration {
        duration_secs(self.workload_delay.max(0.0))
    }

    pub fn tool_timeout(&self) -> Duration {
        duration_secs(self.atitool_timeout.max(0.1))
    }

    pub fn has_workload(&self) -> bool {
        self.workload.as_deref().is_some_and(|w| !w.trim().is_empty())
    }
}
