//! File-based configuration for vmin.
//!
//! Settings are read from `<data_dir>/vmin.toml`; every key is optional and
//! falls back to the defaults below.
//!
//! # Configuration File Format
//!
//! ```toml
//! [search]
//! max_voltage = 1.2
//! min_voltage = 0.0
//! default_voltage_step = 0.00625
//! smu_original_margin = 0.1
//! settle_secs = 5
//! phase2_warmup_secs = 10
//! error_pause_secs = 10
//!
//! [watchdog]
//! port = 8080
//! initial_timeout_secs = 60
//! timeout_multiplier = 5.0
//! min_timeout_secs = 30
//! heartbeat_interval_secs = 5
//!
//! [tools]
//! atitool_cmd = "atitool"
//! smu_cmd = "smu_voltage"
//! diag_cmd = "./diag"
//! workload_mode = "auto"
//!
//! [sim]
//! initial_voltage = 1.0
//! fail_below = 0.85
//! clock_default = 1000.0
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use vmin_common::duration_secs;

pub const CONFIG_FILE_NAME: &str = "vmin.toml";

/// How workloads are executed on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadModeSetting {
    /// Linux hosts use the diagnostic harness, everything else a background app
    #[default]
    Auto,
    Diag,
    Background,
}

impl std::fmt::Display for WorkloadModeSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadModeSetting::Auto => write!(f, "auto"),
            WorkloadModeSetting::Diag => write!(f, "diag"),
            WorkloadModeSetting::Background => write!(f, "background"),
        }
    }
}

/// Voltage search tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSection {
    /// Hard ceiling for phase2, in volts
    #[serde(default = "default_max_voltage")]
    pub max_voltage: f64,
    /// Floor that ends phase1 even without a failure, in volts
    #[serde(default)]
    pub min_voltage: f64,
    /// Step used when the task source leaves `voltage_step` empty
    #[serde(default = "default_voltage_step")]
    pub default_voltage_step: f64,
    /// Added to the starting voltage to derive a restore target for
    /// backends that cannot read the rail back
    #[serde(default = "default_smu_margin")]
    pub smu_original_margin: f64,
    #[serde(default = "default_settle_secs")]
    pub settle_secs: f64,
    #[serde(default = "default_phase2_warmup_secs")]
    pub phase2_warmup_secs: f64,
    /// Pause after an unexpected fault before tearing down
    #[serde(default = "default_error_pause_secs")]
    pub error_pause_secs: f64,
}

fn default_max_voltage() -> f64 {
    1.2
}

fn default_voltage_step() -> f64 {
    0.00625
}

fn default_smu_margin() -> f64 {
    0.1
}

fn default_settle_secs() -> f64 {
    5.0
}

fn default_phase2_warmup_secs() -> f64 {
    10.0
}

fn default_error_pause_secs() -> f64 {
    10.0
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            max_voltage: default_max_voltage(),
            min_voltage: 0.0,
            default_voltage_step: default_voltage_step(),
            smu_original_margin: default_smu_margin(),
            settle_secs: default_settle_secs(),
            phase2_warmup_secs: default_phase2_warmup_secs(),
            error_pause_secs: default_error_pause_secs(),
        }
    }
}

impl SearchSection {
    pub fn settle(&self) -> Duration {
        duration_secs(self.settle_secs.max(0.0))
    }

    pub fn phase2_warmup(&self) -> Duration {
        duration_secs(self.phase2_warmup_secs.max(0.0))
    }

    pub fn error_pause(&self) -> Duration {
        duration_secs(self.error_pause_secs.max(0.0))
    }
}

/// Watchdog heartbeat settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogSection {
    #[serde(default = "default_watchdog_port")]
    pub port: u16,
    /// Heartbeat gap used until a workload has been timed
    #[serde(default = "default_initial_timeout_secs")]
    pub initial_timeout_secs: f64,
    /// Calibrated gap = measured workload duration x multiplier
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: f64,
    #[serde(default = "default_min_timeout_secs")]
    pub min_timeout_secs: f64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: f64,
}

fn default_watchdog_port() -> u16 {
    8080
}

fn default_initial_timeout_secs() -> f64 {
    60.0
}

fn default_timeout_multiplier() -> f64 {
    5.0
}

fn default_min_timeout_secs() -> f64 {
    30.0
}

fn default_heartbeat_interval_secs() -> f64 {
    5.0
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            port: default_watchdog_port(),
            initial_timeout_secs: default_initial_timeout_secs(),
            timeout_multiplier: default_timeout_multiplier(),
            min_timeout_secs: default_min_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

impl WatchdogSection {
    pub fn initial_timeout(&self) -> Duration {
        duration_secs(self.initial_timeout_secs.max(1.0))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        duration_secs(self.heartbeat_interval_secs.max(0.1))
    }
}

/// External tool locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_atitool_cmd")]
    pub atitool_cmd: String,
    #[serde(default = "default_smu_cmd")]
    pub smu_cmd: String,
    #[serde(default = "default_diag_cmd")]
    pub diag_cmd: String,
    #[serde(default)]
    pub workload_mode: WorkloadModeSetting,
}

fn default_atitool_cmd() -> String {
    "atitool".to_string()
}

fn default_smu_cmd() -> String {
    "smu_voltage".to_string()
}

fn default_diag_cmd() -> String {
    "./diag".to_string()
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            atitool_cmd: default_atitool_cmd(),
            smu_cmd: default_smu_cmd(),
            diag_cmd: default_diag_cmd(),
            workload_mode: WorkloadModeSetting::default(),
        }
    }
}

/// Parameters of the simulated rig (`voltage_module = sim`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimSection {
    #[serde(default = "default_sim_initial_voltage")]
    pub initial_voltage: f64,
    /// The simulated workload fails strictly below this voltage
    #[serde(default = "default_sim_fail_below")]
    pub fail_below: f64,
    #[serde(default = "default_sim_clock")]
    pub clock_default: f64,
}

fn default_sim_initial_voltage() -> f64 {
    1.0
}

fn default_sim_fail_below() -> f64 {
    0.85
}

fn default_sim_clock() -> f64 {
    1000.0
}

impl Default for SimSection {
    fn default() -> Self {
        Self {
            initial_voltage: default_sim_initial_voltage(),
            fail_below: default_sim_fail_below(),
            clock_default: default_sim_clock(),
        }
    }
}

/// The complete vmin.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VminToml {
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub watchdog: WatchdogSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub sim: SimSection,
}

impl VminToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse vmin.toml")
    }

    /// Load `<data_dir>/vmin.toml`, or defaults when the file doesn't exist.
    pub fn load_or_default(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize vmin.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Return human-readable warnings for suspicious settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.search.max_voltage <= self.search.min_voltage {
            warnings.push(format!(
                "search.max_voltage ({}) must be above search.min_voltage ({})",
                self.search.max_voltage, self.search.min_voltage
            ));
        }
        if self.search.default_voltage_step <= 0.0 {
            warnings.push("search.default_voltage_step must be positive".to_string());
        }
        if self.search.smu_original_margin < 0.0 {
            warnings.push("search.smu_original_margin should not be negative".to_string());
        }
        if self.watchdog.timeout_multiplier < 1.0 {
            warnings.push(format!(
                "watchdog.timeout_multiplier ({}) is below 1.0; the watchdog will fire during normal runs",
                self.watchdog.timeout_multiplier
            ));
        }
        if self.watchdog.heartbeat_interval_secs >= self.watchdog.min_timeout_secs {
            warnings.push(format!(
                "watchdog.heartbeat_interval_secs ({}) should be well below watchdog.min_timeout_secs ({})",
                self.watchdog.heartbeat_interval_secs, self.watchdog.min_timeout_secs
            ));
        }

        warnings
    }
}
