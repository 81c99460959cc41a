pub mod config;
pub mod engine;
pub mod errors;
pub mod hardware;
pub mod logging;
pub mod platform;
pub mod recovery;
pub mod results;
pub mod runner;
pub mod session;
pub mod sim;
pub mod tasks;
pub mod vmin_config;
pub mod watchdog;
pub mod workload;
