//! Network reachability signal
//!
//! The orchestrator only uses this to skip ticks while offline and to kick an
//! immediate tick when connectivity returns. It is never a source of
//! correctness: records stay `pending` regardless of what the signal says.
//!
//! The host platform drives the signal with [`Reachability::set_reachable`];
//! without one, [`spawn_probe`] polls a URL and treats any HTTP response as
//! reachable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared reachability state with transition notifications.
#[derive(Clone, Debug)]
pub struct Reachability {
    tx: Arc<watch::Sender<bool>>,
}

impl Reachability {
    /// Create a signal with an initial state
    pub fn new(reachable: bool) -> Self {
        let (tx, _rx) = watch::channel(reachable);
        Self { tx: Arc::new(tx) }
    }

    /// Current state
    pub fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the state, notifying subscribers only on a transition.
    ///
    /// Returns true if the state changed.
    pub fn set_reachable(&self, reachable: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });

        if changed {
            tracing::info!(reachable, "Reachability changed");
        }
        changed
    }

    /// Subscribe to transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Reachability {
    /// Assume online until told otherwise
    fn default() -> Self {
        Self::new(true)
    }
}

/// Poll `url` every `interval` and publish the result until cancelled.
pub fn spawn_probe(
    reachability: Reachability,
    url: String,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder()
            .timeout(interval.min(Duration::from_secs(10)))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build reachability probe client");
                return;
            }
        };

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Reachability probe stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let reachable = probe_once(&client, &url).await;
                    reachability.set_reachable(reachable);
                }
            }
        }
    })
}

/// Any HTTP response, whatever its status, means the network is up.
async fn probe_once(client: &reqwest::Client, url: &str) -> bool {
    match client.head(url).send().await {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Reachability probe failed");
            false
        }
    }
}
