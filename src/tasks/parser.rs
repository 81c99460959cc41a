//! Task source parsing.
//!
//! The task source is a CSV sheet with one task per row. Recognised columns:
//!
//! | Column              | Required | Default                         |
//! |---------------------|----------|---------------------------------|
//! | `id`                | yes      |                                 |
//! | `starting_voltage`  | yes      |                                 |
//! | `voltage_step`      | no       | `search.default_voltage_step`   |
//! | `max_voltage`       | no       | `search.max_voltage`            |
//! | `phase1_duration`   | yes      |                                 |
//! | `phase2_duration`   | yes      |                                 |
//! | `workload`          | no       | none                            |
//! | `workload_delay`    | no       | 10 s                            |
//! | `voltage_rail_name` | yes      |                                 |
//! | `asic_package`      | no       | `all`                           |
//! | `asic_die`          | no       | `all`                           |
//! | `voltage_module`    | yes      |                                 |
//! | `diag_loops`        | no       | 1                               |
//! | `atitool_timeout`   | no       | 2 s                             |
//! | `xcaptan`           | no       | false                           |
//! | `clk_<name>`        | no       | no override for clock `<name>`  |
//!
//! Rows whose `id` starts with `#` are disabled and never parsed further.

use anyhow::Context;
use csv::{ReaderBuilder, StringRecord, Trim};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use vmin_common::{ClockOverride, Selector, TaskDescriptor, VoltageModule};

use crate::errors::{VminError, VminResult};

pub const CLOCK_COLUMN_PREFIX: &str = "clk_";
pub const COMMENT_MARKER: char = '#';
pub const DEFAULT_WORKLOAD_DELAY: f64 = 10.0;
pub const DEFAULT_DIAG_LOOPS: u32 = 1;
pub const DEFAULT_ATITOOL_TIMEOUT: f64 = 2.0;

static CLOCK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid clock name regex"));

/// Values applied when a row leaves an optional column empty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskDefaults {
    pub voltage_step: f64,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            voltage_step: 0.00625,
        }
    }
}

/// Declared mapping from `clk_<name>` columns to clock identifiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClockColumns {
    columns: Vec<(usize, String)>,
}

impl ClockColumns {
    pub fn from_headers(headers: &StringRecord) -> VminResult<Self> {
        let mut columns: Vec<(usize, String)> = Vec::new();
        for (idx, header) in headers.iter().enumerate() {
            let Some(name) = header.strip_prefix(CLOCK_COLUMN_PREFIX) else {
                continue;
            };
            if !CLOCK_NAME.is_match(name) {
                return Err(VminError::InvalidTask {
                    row: 0,
                    column: header.to_string(),
                    message: "clock column must be clk_<name> with an alphanumeric name"
                        .to_string(),
                });
            }
            if columns.iter().any(|(_, existing)| existing == name) {
                return Err(VminError::InvalidTask {
                    row: 0,
                    column: header.to_string(),
                    message: "duplicate clock column".to_string(),
                });
            }
            columns.push((idx, name.to_string()));
        }
        Ok(Self { columns })
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|(_, name)| name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A parsed task source, kept as raw records until a row is needed.
#[derive(Debug, Clone)]
pub struct TaskSheet {
    headers: StringRecord,
    rows: Vec<StringRecord>,
    clocks: ClockColumns,
}

impl TaskSheet {
    pub fn load(path: &Path) -> VminResult<Self> {
        if !path.exists() {
            return Err(VminError::TaskSourceMissing {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task source {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> VminResult<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(content.as_bytes());

        let headers = reader
            .headers()
            .context("Failed to read task source header")?
            .clone();
        if !headers.iter().any(|h| h == "id") {
            return Err(VminError::InvalidTask {
                row: 0,
                column: "id".to_string(),
                message: "task source has no id column".to_string(),
            });
        }
        let clocks = ClockColumns::from_headers(&headers)?;

        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record.context("Failed to read task source row")?);
        }

        Ok(Self {
            headers,
            rows,
            clocks,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clock_columns(&self) -> &ClockColumns {
        &self.clocks
    }

    pub fn row_id(&self, index: usize) -> Option<&str> {
        self.value(index, "id")
    }

    /// Disabled rows carry a comment marker at the start of their id.
    pub fn is_disabled(&self, index: usize) -> bool {
        self.row_id(index)
            .is_some_and(|id| id.starts_with(COMMENT_MARKER))
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn value(&self, index: usize, name: &str) -> Option<&str> {
        let col = self.column(name)?;
        self.rows
            .get(index)?
            .get(col)
            .filter(|v| !v.is_empty())
    }

    fn required(&self, index: usize, name: &str) -> VminResult<&str> {
        self.value(index, name).ok_or_else(|| VminError::InvalidTask {
            row: index,
            column: name.to_string(),
            message: "required value is missing".to_string(),
        })
    }

    fn number(&self, index: usize, name: &str, raw: &str) -> VminResult<f64> {
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(VminError::InvalidTask {
                row: index,
                column: name.to_string(),
                message: format!("'{}' is not a finite number", raw),
            }),
        }
    }

    /// A duration column in seconds: non-negative and small enough to sleep on.
    fn seconds(&self, index: usize, name: &str, value: f64) -> VminResult<f64> {
        if value < 0.0 || Duration::try_from_secs_f64(value).is_err() {
            return Err(VminError::InvalidTask {
                row: index,
                column: name.to_string(),
                message: format!("{} is not a usable number of seconds", value),
            });
        }
        Ok(value)
    }

    fn required_seconds(&self, index: usize, name: &str) -> VminResult<f64> {
        let value = self.required_number(index, name)?;
        self.seconds(index, name, value)
    }

    fn optional_seconds(&self, index: usize, name: &str, default: f64) -> VminResult<f64> {
        match self.optional_number(index, name)? {
            Some(value) => self.seconds(index, name, value),
            None => Ok(default),
        }
    }

    fn required_number(&self, index: usize, name: &str) -> VminResult<f64> {
        let raw = self.required(index, name)?;
        self.number(index, name, raw)
    }

    fn optional_number(&self, index: usize, name: &str) -> VminResult<Option<f64>> {
        self.value(index, name)
            .map(|raw| self.number(index, name, raw))
            .transpose()
    }

    fn selector(&self, index: usize, name: &str) -> VminResult<Selector> {
        match self.value(index, name) {
            None => Ok(Selector::All),
            Some(raw) => raw.parse().map_err(|e: anyhow::Error| VminError::InvalidTask {
                row: index,
                column: name.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Build the descriptor for one enabled row.
    pub fn task(&self, index: usize, defaults: &TaskDefaults) -> VminResult<TaskDescriptor> {
        let id = self.required(index, "id")?.to_string();

        let voltage_module = self
            .required(index, "voltage_module")?
            .parse::<VoltageModule>()
            .map_err(|e| VminError::InvalidTask {
                row: index,
                column: "voltage_module".to_string(),
                message: e.to_string(),
            })?;

        let voltage_step = self
            .optional_number(index, "voltage_step")?
            .unwrap_or(defaults.voltage_step);
        if voltage_step <= 0.0 || !voltage_step.is_finite() {
            return Err(VminError::InvalidTask {
                row: index,
                column: "voltage_step".to_string(),
                message: "step must be positive".to_string(),
            });
        }

        let diag_loops = match self.optional_number(index, "diag_loops")? {
            Some(n) if n >= 1.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) => n as u32,
            Some(n) => {
                return Err(VminError::InvalidTask {
                    row: index,
                    column: "diag_loops".to_string(),
                    message: format!("{} is not a whole number of loops (at least one)", n),
                });
            }
            None => DEFAULT_DIAG_LOOPS,
        };

        let mut adjust_clock = Vec::new();
        for (col, name) in &self.clocks.columns {
            let Some(raw) = self.rows[index].get(*col).filter(|v| !v.is_empty()) else {
                continue;
            };
            let column = format!("{}{}", CLOCK_COLUMN_PREFIX, name);
            adjust_clock.push(ClockOverride {
                name: name.clone(),
                value: self.number(index, &column, raw)?,
            });
        }

        let xcaptan = self
            .value(index, "xcaptan")
            .is_some_and(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"));

        Ok(TaskDescriptor {
            id,
            voltage_rail_name: self.required(index, "voltage_rail_name")?.to_string(),
            asic_package: self.selector(index, "asic_package")?,
            asic_die: self.selector(index, "asic_die")?,
            voltage_module,
            starting_voltage: self.required_number(index, "starting_voltage")?,
            voltage_step,
            max_voltage: self.optional_number(index, "max_voltage")?,
            phase1_duration: self.required_seconds(index, "phase1_duration")?,
            phase2_duration: self.required_seconds(index, "phase2_duration")?,
            workload: self.value(index, "workload").map(str::to_string),
            workload_delay: self.optional_seconds(index, "workload_delay", DEFAULT_WORKLOAD_DELAY)?,
            diag_loops,
            atitool_timeout: self.optional_seconds(
                index,
                "atitool_timeout",
                DEFAULT_ATITOOL_TIMEOUT,
            )?,
            clock_names: self.clocks.names(),
            adjust_clock,
            xcaptan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = "\
id,starting_voltage,voltage_step,phase1_duration,phase2_duration,workload,voltage_rail_name,asic_package,asic_die,voltage_module,diag_loops,clk_gfx,clk_soc
1,1.0,0.05,1,1,stress_gfx,VDDCR_GFX,0,1,atitool,3,1800,
#2,0.9,,1,1,stress_gfx,VDDCR_GFX,0,0,atitool,,,
3,0.95,,30,60,,VDDCR_SOC,all,all,smu,,,600
";

    #[test]
    fn test_parse_full_row() {
        let sheet = TaskSheet::parse(SHEET).unwrap();
        assert_eq!(sheet.len(), 3);

        let task = sheet.task(0, &TaskDefaults::default()).unwrap();
        assert_eq!(task.id, "1");
        assert_eq!(task.starting_voltage, 1.0);
        assert_eq!(task.voltage_step, 0.05);
        assert_eq!(task.voltage_module, VoltageModule::Atitool);
        assert_eq!(task.asic_package, Selector::Index(0));
        assert_eq!(task.asic_die, Selector::Index(1));
        assert_eq!(task.diag_loops, 3);
        assert_eq!(task.workload.as_deref(), Some("stress_gfx"));
        assert_eq!(task.workload_delay, DEFAULT_WORKLOAD_DELAY);
        assert_eq!(task.atitool_timeout, DEFAULT_ATITOOL_TIMEOUT);
        assert_eq!(task.clock_names, vec!["gfx", "soc"]);
        assert_eq!(
            task.adjust_clock,
            vec![ClockOverride {
                name: "gfx".into(),
                value: 1800.0
            }]
        );
        assert!(task.max_voltage.is_none());
    }

    #[test]
    fn test_optional_columns_take_defaults() {
        let sheet = TaskSheet::parse(SHEET).unwrap();
        let defaults = TaskDefaults {
            voltage_step: 0.01,
        };
        let task = sheet.task(2, &defaults).unwrap();
        assert_eq!(task.voltage_step, 0.01);
        assert_eq!(task.diag_loops, 1);
        assert_eq!(task.asic_package, Selector::All);
        assert!(task.workload.is_none());
        assert!(!task.has_workload());
        assert_eq!(task.adjust_clock.len(), 1);
        assert_eq!(task.adjust_clock[0].name, "soc");
    }

    #[test]
    fn test_comment_rows_are_disabled() {
        let sheet = TaskSheet::parse(SHEET).unwrap();
        assert!(!sheet.is_disabled(0));
        assert!(sheet.is_disabled(1));
        assert!(!sheet.is_disabled(2));
        assert_eq!(sheet.row_id(1), Some("#2"));
    }

    #[test]
    fn test_non_numeric_value_names_the_column() {
        let sheet = TaskSheet::parse(
            "id,starting_voltage,phase1_duration,phase2_duration,voltage_rail_name,voltage_module\n\
             1,high,1,1,VDD,smu\n",
        )
        .unwrap();
        let err = sheet.task(0, &TaskDefaults::default()).unwrap_err();
        match err {
            VminError::InvalidTask { row, column, .. } => {
                assert_eq!(row, 0);
                assert_eq!(column, "starting_voltage");
            }
            other => panic!("Expected InvalidTask, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_voltage_module_is_rejected() {
        let sheet = TaskSheet::parse(
            "id,starting_voltage,phase1_duration,phase2_duration,voltage_rail_name,voltage_module\n\
             1,1.0,1,1,VDD,pmbus\n",
        )
        .unwrap();
        let err = sheet.task(0, &TaskDefaults::default()).unwrap_err();
        assert!(err.to_string().contains("voltage_module"));
    }

    #[test]
    fn test_invalid_clock_column_is_rejected_at_load() {
        let err = TaskSheet::parse("id,clk_gfx-main\n1,100\n").unwrap_err();
        assert!(err.to_string().contains("clk_gfx-main"));

        let err = TaskSheet::parse("id,clk_gfx,clk_gfx\n1,100,200\n").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_missing_id_column_is_rejected() {
        let err = TaskSheet::parse("name,starting_voltage\nfoo,1.0\n").unwrap_err();
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn test_missing_file_is_task_source_missing() {
        let err = TaskSheet::load(Path::new("/nonexistent/vmin_tasks.csv")).unwrap_err();
        assert!(matches!(err, VminError::TaskSourceMissing { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_zero_diag_loops_is_rejected() {
        let sheet = TaskSheet::parse(
            "id,starting_voltage,phase1_duration,phase2_duration,voltage_rail_name,voltage_module,diag_loops\n\
             1,1.0,1,1,VDD,smu,0\n",
        )
        .unwrap();
        assert!(sheet.task(0, &TaskDefaults::default()).is_err());
    }

    fn single_row(columns: &str, values: &str) -> VminResult<TaskDescriptor> {
        let sheet = TaskSheet::parse(&format!(
            "id,starting_voltage,phase1_duration,phase2_duration,voltage_rail_name,voltage_module,{}\n\
             1,1.0,1,1,VDD,smu,{}\n",
            columns, values
        ))
        .unwrap();
        sheet.task(0, &TaskDefaults::default())
    }

    fn rejected_column(result: VminResult<TaskDescriptor>) -> String {
        match result {
            Err(VminError::InvalidTask { column, .. }) => column,
            other => panic!("Expected InvalidTask, got {other:?}"),
        }
    }

    #[test]
    fn test_non_finite_numbers_are_rejected() {
        assert_eq!(rejected_column(single_row("voltage_step", "NaN")), "voltage_step");
        assert_eq!(rejected_column(single_row("max_voltage", "inf")), "max_voltage");
        assert_eq!(rejected_column(single_row("clk_gfx", "-inf")), "clk_gfx");
    }

    #[test]
    fn test_unusable_durations_are_rejected() {
        assert_eq!(
            rejected_column(single_row("workload_delay", "1e20")),
            "workload_delay"
        );
        assert_eq!(
            rejected_column(single_row("atitool_timeout", "-2")),
            "atitool_timeout"
        );

        let sheet = TaskSheet::parse(
            "id,starting_voltage,phase1_duration,phase2_duration,voltage_rail_name,voltage_module\n\
             1,1.0,1e20,1,VDD,smu\n",
        )
        .unwrap();
        assert_eq!(
            rejected_column(sheet.task(0, &TaskDefaults::default())),
            "phase1_duration"
        );
    }

    #[test]
    fn test_fractional_diag_loops_is_rejected() {
        assert_eq!(rejected_column(single_row("diag_loops", "2.5")), "diag_loops");
        assert_eq!(single_row("diag_loops", "2.0").unwrap().diag_loops, 2);
    }
}
