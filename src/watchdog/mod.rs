//! Watchdog heartbeat transport.
//!
//! The capability trait lives in `vmin_common::WatchdogClient`.
//! Real implementation: `HttpWatchdog`. Test double: `SimWatchdog`.

pub mod http;

pub use http::{Heartbeat, HttpWatchdog};
