use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Heartbeat client for the remote reset service.
///
/// While the service runs, the remote side reboots the host if no heartbeat
/// arrives within the current timeout. Heartbeats are fire-and-forget from
/// the caller's point of view.
#[async_trait]
pub trait WatchdogClient: Send + Sync {
    async fn start(&self, timeout: Duration) -> Result<()>;

    /// Change the allowed gap between heartbeats.
    async fn update_timeout(&self, timeout: Duration) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}
