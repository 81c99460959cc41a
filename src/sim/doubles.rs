//! Test doubles for the session collaborators.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use vmin_common::{Selector, TaskDescriptor, VoltageModule, WatchdogClient};

use super::{SimBench, SimEvent};
use crate::errors::VminResult;
use crate::platform::Autostart;
use crate::results::{ResultSink, TaskRecord};
use crate::session::{PersistentStore, SessionState};

/// A small single-rail task on the simulated rig.
pub fn sample_task(id: &str) -> TaskDescriptor {
    TaskDescriptor {
        id: id.to_string(),
        voltage_rail_name: "VDDCR_SOC".to_string(),
        asic_package: Selector::Index(0),
        asic_die: Selector::All,
        voltage_module: VoltageModule::Sim,
        starting_voltage: 1.0,
        voltage_step: 0.05,
        max_voltage: None,
        phase1_duration: 1.0,
        phase2_duration: 1.0,
        workload: Some("diag_sim".to_string()),
        workload_delay: 0.0,
        diag_loops: 1,
        atitool_timeout: 2.0,
        clock_names: Vec::new(),
        adjust_clock: Vec::new(),
        xcaptan: false,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Checkpoint store that keeps every snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    current: Mutex<Option<SessionState>>,
    history: Mutex<Vec<SessionState>>,
    bench: Option<SimBench>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose checkpoints also land in the bench journal.
    pub fn journaled(bench: SimBench) -> Self {
        Self {
            bench: Some(bench),
            ..Self::default()
        }
    }

    /// Seed the store as if a previous process had checkpointed `state`.
    pub fn with_state(self, state: SessionState) -> Self {
        *lock(&self.current) = Some(state);
        self
    }

    pub fn history(&self) -> Vec<SessionState> {
        lock(&self.history).clone()
    }

    pub fn latest(&self) -> Option<SessionState> {
        lock(&self.current).clone()
    }
}

impl PersistentStore for MemoryStore {
    fn save(&self, state: &SessionState) -> VminResult<()> {
        *lock(&self.current) = Some(state.clone());
        lock(&self.history).push(state.clone());
        if let Some(bench) = &self.bench {
            bench.record(SimEvent::Checkpoint(Box::new(state.clone())));
        }
        Ok(())
    }

    fn load(&self) -> VminResult<Option<SessionState>> {
        Ok(self.latest())
    }

    fn delete(&self) -> VminResult<()> {
        *lock(&self.current) = None;
        if let Some(bench) = &self.bench {
            bench.record(SimEvent::CheckpointDeleted);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct WatchdogLog {
    running: bool,
    timeouts: Vec<Duration>,
    stops: u32,
}

/// Watchdog that only records what it was told.
#[derive(Debug, Default)]
pub struct SimWatchdog {
    log: Mutex<WatchdogLog>,
    bench: Option<SimBench>,
}

impl SimWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn journaled(bench: SimBench) -> Self {
        Self {
            bench: Some(bench),
            ..Self::default()
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.log).running
    }

    /// Every heartbeat gap set through `start` or `update_timeout`.
    pub fn timeouts(&self) -> Vec<Duration> {
        lock(&self.log).timeouts.clone()
    }

    pub fn stops(&self) -> u32 {
        lock(&self.log).stops
    }

    fn set_timeout(&self, timeout: Duration) {
        lock(&self.log).timeouts.push(timeout);
        if let Some(bench) = &self.bench {
            bench.record(SimEvent::WatchdogTimeout(timeout));
        }
    }
}

#[async_trait]
impl WatchdogClient for SimWatchdog {
    async fn start(&self, timeout: Duration) -> Result<()> {
        lock(&self.log).running = true;
        self.set_timeout(timeout);
        Ok(())
    }

    async fn update_timeout(&self, timeout: Duration) -> Result<()> {
        self.set_timeout(timeout);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        {
            let mut log = lock(&self.log);
            log.running = false;
            log.stops += 1;
        }
        if let Some(bench) = &self.bench {
            bench.record(SimEvent::WatchdogStopped);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SimAutostart {
    registered: Mutex<bool>,
    registrations: Mutex<u32>,
}

impl SimAutostart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registrations(&self) -> u32 {
        *lock(&self.registrations)
    }
}

impl Autostart for SimAutostart {
    fn register(&self) -> Result<()> {
        *lock(&self.registered) = true;
        *lock(&self.registrations) += 1;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        *lock(&self.registered) = false;
        Ok(())
    }

    fn is_registered(&self) -> bool {
        *lock(&self.registered)
    }
}

#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<TaskRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TaskRecord> {
        lock(&self.records).clone()
    }
}

impl ResultSink for CollectingSink {
    fn emit(&self, record: &TaskRecord) -> Result<()> {
        lock(&self.records).push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionParams;
    use std::path::PathBuf;

    fn session() -> SessionState {
        SessionState::new(
            ConnectionParams::default(),
            PathBuf::from("tasks.csv"),
            PathBuf::from("diag"),
        )
    }

    #[test]
    fn test_memory_store_keeps_history_and_journals() {
        let bench = SimBench::new(1.0, 0.85);
        let store = bench.store();
        let mut state = session();
        store.save(&state).unwrap();
        state.task_index = 2;
        store.save(&state).unwrap();

        assert_eq!(store.history().len(), 2);
        assert_eq!(store.load().unwrap().unwrap().task_index, 2);
        assert_eq!(bench.checkpoints().len(), 2);

        store.delete().unwrap();
        assert!(store.load().unwrap().is_none());
        assert_eq!(bench.journal().last(), Some(&SimEvent::CheckpointDeleted));
    }

    #[tokio::test]
    async fn test_sim_watchdog_records_timeouts() {
        let wd = SimWatchdog::new();
        wd.start(Duration::from_secs(60)).await.unwrap();
        wd.update_timeout(Duration::from_secs(30)).await.unwrap();
        assert!(wd.is_running());
        wd.stop().await.unwrap();
        assert!(!wd.is_running());
        assert_eq!(
            wd.timeouts(),
            vec![Duration::from_secs(60), Duration::from_secs(30)]
        );
        assert_eq!(wd.stops(), 1);
    }

    #[test]
    fn test_sim_autostart_counts_registrations() {
        let autostart = SimAutostart::new();
        autostart.register().unwrap();
        autostart.register().unwrap();
        assert!(autostart.is_registered());
        assert_eq!(autostart.registrations(), 2);
        autostart.remove().unwrap();
        assert!(!autostart.is_registered());
    }
}
