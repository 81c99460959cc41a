//! Session inspection and reset commands.

use anyhow::Result;
use console::style;

use vmin::config::Config;
use vmin::platform::{Autostart, LauncherAutostart};
use vmin::session::{FileStore, PersistentStore, SessionLock};

use super::super::Cli;

fn volts(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.6} V", v))
        .unwrap_or_else(|| "-".to_string())
}

pub fn cmd_status(cli: &Cli) -> Result<()> {
    let config = Config::new(cli.data_dir.clone(), cli.verbose)?;
    let store = FileStore::new(config.state_file.clone());

    println!();
    println!("vmin Session Status");
    println!("===================");
    println!();
    println!("Data dir:   {}", config.data_dir.display());

    let warnings = config.settings.validate();
    if !warnings.is_empty() {
        println!();
        println!("{}", style("Configuration warnings:").yellow().bold());
        for warning in &warnings {
            println!("  - {}", warning);
        }
    }

    println!();
    let Some(state) = store.load()? else {
        println!("Session:    {}", style("None").dim());
        println!();
        println!("Run 'vmin run --start --server-ip <ip> --wombat-ip <ip>' to begin.");
        println!();
        return Ok(());
    };

    println!("Session:    {}", state.session_id);
    println!("Task file:  {}", state.task_file.display());
    println!("Diag dir:   {}", state.diag_folder.display());
    println!("Row:        {}", state.task_index);
    let phase = if state.phase.in_flight() {
        style(state.phase.to_string()).cyan().bold()
    } else {
        style(state.phase.to_string()).dim()
    };
    println!("Phase:      {}", phase);
    if let Some(task) = &state.task {
        println!();
        println!("Active task {}", style(&task.id).bold());
        println!(
            "  Rail:     {} (package {}, die {}, {})",
            task.voltage_rail_name, task.asic_package, task.asic_die, task.voltage_module
        );
        let key = task.package_key();
        println!("  Current:  {}", volts(state.current_voltage));
        println!("  Actual:   {}", volts(state.actual_voltage.get(&key).copied()));
        println!(
            "  Passing:  {}",
            volts(state.last_passing_voltage.get(&key).copied())
        );
        println!("  Original: {}", volts(state.restore_target()));
        if let Some(timeout) = state.calibrated_timeout() {
            println!("  Watchdog: {:.1}s", timeout.as_secs_f64());
        }
        println!("  Running:  {}s", state.duration().num_seconds());
    }
    if !state.results.is_empty() {
        println!();
        println!("Results:");
        for result in &state.results {
            println!("  {:<12} {}", result.name, volts(Some(result.value)));
        }
    }
    if !state.default_clock.is_empty() {
        println!();
        println!("Default clocks:");
        for (clock, value) in &state.default_clock {
            println!("  {:<12} {}", clock, value);
        }
    }
    println!();
    Ok(())
}

pub fn cmd_reset(cli: &Cli, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    let config = Config::new(cli.data_dir.clone(), cli.verbose)?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This discards the checkpointed session. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let _lock = SessionLock::acquire(&config.lock_file)?;
    FileStore::new(config.state_file.clone()).delete()?;
    match LauncherAutostart::for_current_exe(&config.data_dir) {
        Ok(autostart) => autostart.remove()?,
        Err(e) => println!("{} {:#}", style("Skipping autostart cleanup:").yellow(), e),
    }

    println!("Reset complete");
    Ok(())
}
