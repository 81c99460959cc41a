//! CLI command implementations.
//!
//! | Module    | Commands handled    |
//! |-----------|---------------------|
//! | `run`     | `Run`               |
//! | `session` | `Status`, `Reset`   |
//! | `tasks`   | `Tasks`             |

pub mod run;
pub mod session;
pub mod tasks;

pub use run::cmd_run;
pub use session::{cmd_reset, cmd_status};
pub use tasks::cmd_tasks;
