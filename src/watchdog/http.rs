use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vmin_common::WatchdogClient;

/// Body of every heartbeat and release request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Heartbeat {
    /// Power-cycling peer the server should act on
    pub peer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    pub timeout_secs: f64,
}

/// Heartbeat client for the remote reset server.
///
/// `start` spawns a loop that POSTs to `/heartbeat` every interval; the
/// allowed gap travels through a `watch` channel so `update_timeout` takes
/// effect on the next beat.
pub struct HttpWatchdog {
    base_url: String,
    peer: String,
    client_ip: Option<String>,
    interval: Duration,
    http: reqwest::Client,
    timeout_tx: watch::Sender<Duration>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HttpWatchdog {
    pub fn new(
        server: &str,
        port: u16,
        peer: &str,
        client_ip: Option<String>,
        interval: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build watchdog HTTP client")?;
        let (timeout_tx, _) = watch::channel(Duration::ZERO);
        Ok(Self {
            base_url: format!("http://{}:{}", server, port),
            peer: peer.to_string(),
            client_ip,
            interval,
            http,
            timeout_tx,
            handle: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn beat(&self, timeout: Duration) -> Heartbeat {
        Heartbeat {
            peer: self.peer.clone(),
            client: self.client_ip.clone(),
            timeout_secs: timeout.as_secs_f64(),
        }
    }

    async fn post(http: &reqwest::Client, url: &str, body: &Heartbeat) -> Result<()> {
        http.post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach watchdog server at {}", url))?
            .error_for_status()
            .context("Watchdog server rejected request")?;
        Ok(())
    }

    fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.handle.lock().ok().and_then(|mut h| h.take())
    }
}

#[async_trait]
impl WatchdogClient for HttpWatchdog {
    async fn start(&self, timeout: Duration) -> Result<()> {
        if let Some(previous) = self.take_handle() {
            previous.abort();
        }
        self.timeout_tx.send_replace(timeout);

        let http = self.http.clone();
        let url = format!("{}/heartbeat", self.base_url);
        let mut rx = self.timeout_tx.subscribe();
        let template = self.beat(timeout);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let beat = Heartbeat {
                    timeout_secs: rx.borrow_and_update().as_secs_f64(),
                    ..template.clone()
                };
                match Self::post(&http, &url, &beat).await {
                    Ok(()) => debug!(timeout_secs = beat.timeout_secs, "Heartbeat sent"),
                    Err(e) => warn!(error = %e, "Heartbeat failed"),
                }
            }
        });

        if let Ok(mut slot) = self.handle.lock() {
            *slot = Some(handle);
        }
        info!(
            server = %self.base_url,
            peer = %self.peer,
            timeout_secs = timeout.as_secs_f64(),
            "Watchdog heartbeat started"
        );
        Ok(())
    }

    async fn update_timeout(&self, timeout: Duration) -> Result<()> {
        let previous = self.timeout_tx.send_replace(timeout);
        if previous != timeout {
            info!(timeout_secs = timeout.as_secs_f64(), "Watchdog timeout updated");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(handle) = self.take_handle() else {
            return Ok(());
        };
        handle.abort();
        let url = format!("{}/release", self.base_url);
        let beat = self.beat(*self.timeout_tx.borrow());
        if let Err(e) = Self::post(&self.http, &url, &beat).await {
            warn!(error = %e, "Failed to release watchdog");
        }
        info!("Watchdog heartbeat stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpWatchdog {
        HttpWatchdog::new(
            "127.0.0.1",
            9,
            "10.0.0.2",
            Some("10.0.0.3".into()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_heartbeat_body() {
        let wd = client();
        assert_eq!(wd.base_url(), "http://127.0.0.1:9");
        let json = serde_json::to_value(wd.beat(Duration::from_secs(100))).unwrap();
        assert_eq!(json["peer"], "10.0.0.2");
        assert_eq!(json["client"], "10.0.0.3");
        assert_eq!(json["timeout_secs"], 100.0);
    }

    #[test]
    fn test_client_is_omitted_when_unknown() {
        let wd = HttpWatchdog::new("srv", 8080, "peer", None, Duration::from_secs(5)).unwrap();
        let json = serde_json::to_value(wd.beat(Duration::from_secs(60))).unwrap();
        assert!(json.get("client").is_none());
    }

    #[tokio::test]
    async fn test_update_timeout_reaches_loop() {
        let wd = client();
        let mut rx = wd.timeout_tx.subscribe();
        wd.update_timeout(Duration::from_secs(45)).await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        client().stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_server_is_not_fatal() {
        let wd = client();
        wd.start(Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        wd.stop().await.unwrap();
    }
}
