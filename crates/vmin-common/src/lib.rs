//! Shared domain types for the vmin characterization runner.
//!
//! This crate holds the vocabulary that both the search engine and the
//! hardware integrations speak:
//! - `types`: task descriptors, package/die selectors, phases and outcomes
//! - `hardware`: voltage and clock capability traits plus their error type
//! - `watchdog`: the heartbeat client capability

pub mod hardware;
pub mod types;
pub mod watchdog;

pub use hardware::{ClockBackend, HardwareError, VoltageBackend};
pub use types::{
    ClockOverride, Outcome, SearchPhase, Selector, TaskDescriptor, VoltageModule, duration_secs,
    round_volts,
};
pub use watchdog::WatchdogClient;
