//! In-flight request tracking used to decide when a page has gone quiet.

use anyhow::{Result, anyhow, bail};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

/// Minimum quiet period with zero open requests.
pub(crate) const NETWORK_IDLE_WINDOW: Duration = Duration::from_millis(500);

/// Tracks requests announced by the `Network` domain.
///
/// The page is idle once no request has been open for [`NETWORK_IDLE_WINDOW`].
#[derive(Debug)]
pub(crate) struct NetworkIdle {
    inflight: HashSet<String>,
    quiet_since: Option<Instant>,
    window: Duration,
}

impl NetworkIdle {
    pub(crate) fn new(now: Instant) -> Self {
        Self::with_window(now, NETWORK_IDLE_WINDOW)
    }

    pub(crate) fn with_window(now: Instant, window: Duration) -> Self {
        Self {
            inflight: HashSet::new(),
            quiet_since: Some(now),
            window,
        }
    }

    /// Feeds one session event into the tracker.
    pub(crate) fn observe(&mut self, event: &Value, now: Instant) {
        let Some(request_id) = event["params"]["requestId"].as_str() else {
            return;
        };
        match event["method"].as_str() {
            Some("Network.requestWillBeSent") => {
                self.inflight.insert(request_id.to_string());
                self.quiet_since = None;
            }
            Some("Network.loadingFinished") | Some("Network.loadingFailed") => {
                if self.inflight.remove(request_id) && self.inflight.is_empty() {
                    self.quiet_since = Some(now);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// Instant at which the page counts as idle, if no request is open.
    pub(crate) fn idle_at(&self) -> Option<Instant> {
        self.quiet_since.map(|since| since + self.window)
    }
}

/// Consumes session events until no request has been open for the idle window.
///
/// Fails once `deadline` passes or the event stream closes first.
pub(crate) async fn wait_for_network_idle(
    mut events: mpsc::UnboundedReceiver<Value>,
    deadline: Instant,
) -> Result<()> {
    let mut tracker = NetworkIdle::new(Instant::now());
    loop {
        let idle_at = tracker.idle_at();
        tokio::select! {
            event = events.recv() => {
                let event = event.ok_or_else(|| anyhow!("Event stream closed while waiting for network idle"))?;
                tracker.observe(&event, Instant::now());
            }
            _ = time::sleep_until(idle_at.unwrap_or(deadline)), if idle_at.is_some() => {
                return Ok(());
            }
            _ = time::sleep_until(deadline) => {
                bail!(
                    "Timeout waiting for network idle ({} request(s) still pending)",
                    tracker.inflight()
                );
            }
        }
    }
}
