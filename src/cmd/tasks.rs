//! Task source listing.

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use vmin::config::{Config, DEFAULT_TASK_FILE};
use vmin::session::{FileStore, PersistentStore};
use vmin::tasks::{TaskDefaults, TaskSheet};

use super::super::Cli;

pub fn cmd_tasks(cli: &Cli, task_csv: Option<PathBuf>) -> Result<()> {
    let config = Config::new(cli.data_dir.clone(), cli.verbose)?;
    let checkpoint = FileStore::new(config.state_file.clone()).load()?;

    let path = match (task_csv, &checkpoint) {
        (Some(path), _) => Config::absolutize(&path)?,
        (None, Some(state)) => state.task_file.clone(),
        (None, None) => Config::absolutize(&PathBuf::from(DEFAULT_TASK_FILE))?,
    };
    let sheet = TaskSheet::load(&path)?;
    let defaults = TaskDefaults {
        voltage_step: config.settings.search.default_voltage_step,
    };
    let cursor = checkpoint
        .as_ref()
        .filter(|state| state.task_file == path)
        .map(|state| state.task_index);

    println!();
    println!("Tasks loaded from: {}", path.display());
    if !sheet.clock_columns().is_empty() {
        println!("Clock columns: {}", sheet.clock_columns().names().join(", "));
    }
    println!();
    println!(
        "{:<4} {:<10} {:<10} {:<16} {:<8} {:<8} Workload",
        "Row", "Id", "Status", "Rail", "Module", "Start"
    );
    println!(
        "{:<4} {:<10} {:<10} {:<16} {:<8} {:<8} --------",
        "---", "----------", "----------", "----------------", "------", "-----"
    );

    let mut enabled = 0;
    for index in 0..sheet.len() {
        let marker = if cursor == Some(index) { ">" } else { " " };
        if sheet.is_disabled(index) {
            println!(
                "{}{:<3} {:<10} {}",
                marker,
                index,
                sheet.row_id(index).unwrap_or(""),
                style("skipped").dim()
            );
            continue;
        }
        match sheet.task(index, &defaults) {
            Ok(task) => {
                enabled += 1;
                println!(
                    "{}{:<3} {:<10} {:<10} {:<16} {:<8} {:<8.4} {}",
                    marker,
                    index,
                    task.id,
                    style("enabled").green(),
                    task.voltage_rail_name,
                    task.voltage_module.to_string(),
                    task.starting_voltage,
                    task.workload.as_deref().unwrap_or("-")
                );
            }
            Err(e) => {
                println!(
                    "{}{:<3} {:<10} {} {}",
                    marker,
                    index,
                    sheet.row_id(index).unwrap_or(""),
                    style("invalid").red(),
                    e
                );
            }
        }
    }
    println!();
    println!("{} of {} rows enabled", enabled, sheet.len());
    println!();
    Ok(())
}
