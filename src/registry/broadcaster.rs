use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::ServiceRegistry;
use crate::lifecycle::QuitReceiver;
use crate::metrics::ServiceMetrics;
use crate::types::Snapshot;

/// Latest-value broadcast of registry snapshots.
///
/// Subscribers never queue: a slow one simply observes the newest snapshot
/// when it next looks, and no subscriber can hold up another.
pub struct SnapshotBroadcaster {
    tx: watch::Sender<Option<Arc<Snapshot>>>,
}

impl SnapshotBroadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Publishes every snapshot, identical or not, so each poll re-runs
    /// every synchronizer; unchanged output is caught by the hash diff.
    /// Returns `true` when the snapshot differed from the last published one.
    pub fn publish(&self, snapshot: Snapshot) -> bool {
        let mut differs = false;
        self.tx.send_modify(|current| {
            differs = current.as_deref() != Some(&snapshot);
            *current = Some(Arc::new(snapshot));
        });
        differs
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.tx.borrow().clone()
    }

    /// A subscriber joining after the first publish sees the current
    /// snapshot on its first `changed()` call.
    pub fn subscribe(&self) -> SnapshotSubscriber {
        let mut rx = self.tx.subscribe();
        if rx.borrow().is_some() {
            rx.mark_changed();
        }
        SnapshotSubscriber { rx }
    }
}

impl Default for SnapshotBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SnapshotSubscriber {
    rx: watch::Receiver<Option<Arc<Snapshot>>>,
}

impl SnapshotSubscriber {
    /// Waits for a snapshot newer than the last one this subscriber saw and
    /// returns the most recent. `None` once the broadcaster is gone.
    pub async fn changed(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(snapshot) = self.rx.borrow_and_update().clone() {
                return Some(snapshot);
            }
        }
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.rx.borrow().clone()
    }
}

/// Polls the registry on a fixed interval until quit. A failed poll keeps
/// the previous snapshot published.
pub async fn run_poll_loop(
    registry: Arc<dyn ServiceRegistry>,
    broadcaster: Arc<SnapshotBroadcaster>,
    metrics: Arc<ServiceMetrics>,
    interval: Duration,
    mut quit: QuitReceiver,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = quit.recv() => {
                tracing::warn!("Stopping registry monitor");
                return;
            }
            _ = ticker.tick() => {
                match registry.list_services().await {
                    Ok(snapshot) => {
                        metrics.inc_poll(snapshot.len());
                        let services = snapshot.len();
                        if broadcaster.publish(snapshot) {
                            tracing::debug!(services, "Registry snapshot changed");
                        }
                    }
                    Err(e) => {
                        metrics.inc_poll_failure();
                        tracing::warn!(error = %e, "Could not fetch registry services");
                    }
                }
            }
        }
    }
}
