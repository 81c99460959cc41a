//! Session model and its durable checkpoint.

pub mod state;
pub mod store;

pub use state::{ConnectionParams, NamedResult, SessionState};
pub use store::{FileStore, PersistentStore, SessionLock, load_required};
