use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::Instrument;

use super::hash_store::ContentHashStore;
use super::hasher::ContentHasher;
use super::writer::write_atomic;
use super::{document, CheckKind};
use crate::config::FailureSeverity;
use crate::lifecycle::QuitReceiver;
use crate::metrics::ServiceMetrics;
use crate::registry::SnapshotSubscriber;
use crate::types::{ChangeEvent, Snapshot};
use crate::Result;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Unchanged,
    Written(ChangeEvent),
    /// The file could not be replaced; the stored hash is untouched so the
    /// next snapshot change retries.
    WriteFailed,
}

/// One check type's pipeline from registry snapshot to config file.
pub struct CheckSynchronizer<K: CheckKind> {
    kind: K,
    path: PathBuf,
    hashes: Arc<ContentHashStore>,
    events: mpsc::Sender<ChangeEvent>,
    metrics: Arc<ServiceMetrics>,
    on_integrity_failure: FailureSeverity,
}

impl<K: CheckKind> CheckSynchronizer<K> {
    pub fn new(
        kind: K,
        path: PathBuf,
        hashes: Arc<ContentHashStore>,
        events: mpsc::Sender<ChangeEvent>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            kind,
            path,
            hashes,
            events,
            metrics,
            on_integrity_failure: FailureSeverity::Fatal,
        }
    }

    pub fn with_integrity_severity(mut self, severity: FailureSeverity) -> Self {
        self.on_integrity_failure = severity;
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Opted-in services projected to check instances, in write order.
    pub async fn collect(&self, snapshot: &Snapshot) -> Vec<K::Instance> {
        let mut instances = Vec::new();

        for service in snapshot.services() {
            if !self.kind.wants(service) {
                tracing::trace!(service = %service.name, "Service not tagged for check");
                continue;
            }

            match self.kind.project(service).await {
                Some(instance) => instances.push(instance),
                None => {
                    tracing::debug!(service = %service.name, "Service left out of check config");
                }
            }
        }

        instances.sort();
        instances
    }

    /// Runs one cycle against `snapshot`.
    pub async fn sync(&self, snapshot: &Snapshot) -> Result<SyncOutcome> {
        let name = self.kind.name();
        let instances = self.collect(snapshot).await;
        self.metrics.set_check_instances(name, instances.len());

        let bytes = document::render(&instances)?;
        let current = ContentHasher::hash(&bytes);
        let previous = self.hashes.current(name).await;

        if !ContentHasher::is_changed(previous.as_ref(), &current) {
            tracing::debug!(check = name, "File hash is the same, NOOP");
            return Ok(SyncOutcome::Unchanged);
        }

        if let Err(e) = write_atomic(&self.path, bytes).await {
            if e.is_integrity() {
                return Err(e);
            }
            self.metrics.inc_write_failure();
            tracing::error!(check = name, path = %self.path.display(), error = %e, "Could not write config file");
            return Ok(SyncOutcome::WriteFailed);
        }

        self.hashes.update(name, current.clone()).await;
        self.metrics.inc_write();

        let event = ChangeEvent {
            check: name,
            previous,
            current,
        };
        tracing::info!(
            check = name,
            path = %self.path.display(),
            instances = instances.len(),
            change = %event,
            "Successfully updated config file"
        );

        self.notify(event.clone());
        Ok(SyncOutcome::Written(event))
    }

    fn notify(&self, event: ChangeEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            // Queued events already guarantee a reload that rereads this file.
            Err(TrySendError::Full(_)) => {
                tracing::debug!(check = self.kind.name(), "Reload queue full, change already covered");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(check = self.kind.name(), "Reload coordinator is gone, change not reported");
            }
        }
    }

    /// Seeds the stored hash from disk, then follows the snapshot broadcast
    /// until quit or until the broadcaster goes away.
    pub async fn run(self, mut snapshots: SnapshotSubscriber, mut quit: QuitReceiver) -> Result<()> {
        let name = self.kind.name();
        let span = tracing::info_span!("sync", check = name);

        async move {
            self.hashes.seed(name, &self.path).await;

            loop {
                tokio::select! {
                    _ = quit.recv() => {
                        tracing::warn!("Stopping");
                        return Ok(());
                    }
                    changed = snapshots.changed() => {
                        let Some(snapshot) = changed else {
                            tracing::warn!("Snapshot broadcast closed, stopping");
                            return Ok(());
                        };

                        if let Err(e) = self.sync(&snapshot).await {
                            match self.on_integrity_failure {
                                FailureSeverity::Fatal => return Err(e),
                                FailureSeverity::Recoverable => {
                                    tracing::error!(error = %e, "Sync cycle failed");
                                }
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{RedisCheck, TcpCheck};
    use crate::lifecycle::ShutdownSignal;
    use crate::registry::SnapshotBroadcaster;
    use crate::test_utils::{service, snapshot, TestContext};
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_run_on_same_snapshot_is_noop() {
        let mut ctx = TestContext::new();
        let sync = ctx.synchronizer(RedisCheck, "redisdb.yaml");
        let snap = snapshot(vec![
            service("cache", "10.0.0.5", 6379, &["dd-redisdb"]),
            service("web", "10.0.0.6", 80, &[]),
        ]);

        let first = sync.sync(&snap).await.unwrap();
        assert!(matches!(first, SyncOutcome::Written(_)));
        let second = sync.sync(&snap).await.unwrap();
        assert_eq!(second, SyncOutcome::Unchanged);

        assert_eq!(ctx.metrics.snapshot().config_writes, 1);
        assert!(ctx.events_rx.try_recv().is_ok());
        assert!(ctx.events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_output_independent_of_map_order() {
        let ctx = TestContext::new();
        let sync = ctx.synchronizer(TcpCheck, "tcp_check.yaml");
        let mut records = vec![
            service("a", "10.0.0.1", 80, &["dd-tcp-check"]),
            service("b", "10.0.0.2", 80, &["dd-tcp-check"]),
            service("c", "10.0.0.3", 22, &["dd-tcp-check"]),
            service("d", "10.0.0.1", 443, &["dd-tcp-check"]),
        ];

        let expected = document::render(&sync.collect(&snapshot(records.clone())).await).unwrap();
        for _ in 0..records.len() {
            records.rotate_left(1);
            let mut reversed = records.clone();
            reversed.reverse();
            for permutation in [records.clone(), reversed] {
                let rendered =
                    document::render(&sync.collect(&snapshot(permutation)).await).unwrap();
                assert_eq!(rendered, expected);
            }
        }
    }

    #[tokio::test]
    async fn test_written_file_hash_matches_seed() {
        let ctx = TestContext::new();
        let sync = ctx.synchronizer(RedisCheck, "redisdb.yaml");
        let snap = snapshot(vec![service("cache", "10.0.0.5", 6379, &["dd-redisdb"])]);

        let SyncOutcome::Written(event) = sync.sync(&snap).await.unwrap() else {
            panic!("expected a write");
        };

        let fresh = ContentHashStore::new();
        let seeded = fresh.seed("redisdb", &ctx.path("redisdb.yaml")).await;
        assert_eq!(seeded, Some(event.current));
    }

    #[tokio::test]
    async fn test_event_carries_previous_hash() {
        let mut ctx = TestContext::new();
        let sync = ctx.synchronizer(RedisCheck, "redisdb.yaml");

        sync.sync(&snapshot(vec![service("a", "10.0.0.1", 6379, &["dd-redisdb"])]))
            .await
            .unwrap();
        sync.sync(&snapshot(vec![service("b", "10.0.0.2", 6379, &["dd-redisdb"])]))
            .await
            .unwrap();

        let first = ctx.events_rx.try_recv().unwrap();
        let second = ctx.events_rx.try_recv().unwrap();
        assert_eq!(first.previous, None);
        assert_eq!(second.previous, Some(first.current));
        assert_eq!(second.check, "redisdb");
    }

    #[tokio::test]
    async fn test_unchanged_file_on_disk_is_not_rewritten() {
        let ctx = TestContext::new();
        let sync = ctx.synchronizer(RedisCheck, "redisdb.yaml");
        let snap = snapshot(vec![service("cache", "10.0.0.5", 6379, &["dd-redisdb"])]);
        let bytes = document::render(&sync.collect(&snap).await).unwrap();
        std::fs::write(ctx.path("redisdb.yaml"), &bytes).unwrap();

        ctx.hashes.seed("redisdb", &ctx.path("redisdb.yaml")).await;

        assert_eq!(sync.sync(&snap).await.unwrap(), SyncOutcome::Unchanged);
        assert_eq!(ctx.metrics.snapshot().config_writes, 0);
    }

    #[tokio::test]
    async fn test_missing_directory_is_integrity_failure() {
        let ctx = TestContext::new();
        let sync = ctx.synchronizer(RedisCheck, "missing/redisdb.yaml");
        let snap = snapshot(vec![service("cache", "10.0.0.5", 6379, &["dd-redisdb"])]);

        let err = sync.sync(&snap).await.unwrap_err();
        assert!(err.is_integrity());
        assert!(ctx.hashes.current("redisdb").await.is_none());
    }

    #[tokio::test]
    async fn test_write_failure_keeps_hash_and_retries() {
        let mut ctx = TestContext::new();
        let sync = ctx.synchronizer(RedisCheck, "redisdb.yaml");
        let snap = snapshot(vec![service("cache", "10.0.0.5", 6379, &["dd-redisdb"])]);

        // A directory at the destination lets the temp file be created but
        // makes the final rename fail.
        std::fs::create_dir(ctx.path("redisdb.yaml")).unwrap();

        assert_eq!(sync.sync(&snap).await.unwrap(), SyncOutcome::WriteFailed);
        assert!(ctx.hashes.current("redisdb").await.is_none());
        assert!(ctx.events_rx.try_recv().is_err());
        assert_eq!(ctx.metrics.snapshot().config_write_failures, 1);
        assert_eq!(ctx.metrics.snapshot().config_writes, 0);
        assert_eq!(std::fs::read_dir(ctx.path("")).unwrap().count(), 1);

        std::fs::remove_dir(ctx.path("redisdb.yaml")).unwrap();

        let SyncOutcome::Written(event) = sync.sync(&snap).await.unwrap() else {
            panic!("expected the retry to write");
        };
        assert_eq!(event.previous, None);
        assert_eq!(ctx.hashes.current("redisdb").await, Some(event.current));
        assert!(ctx.events_rx.try_recv().is_ok());
        assert_eq!(ctx.metrics.snapshot().config_writes, 1);
    }

    #[tokio::test]
    async fn test_full_event_queue_does_not_block() {
        let ctx = TestContext::with_event_capacity(1);
        let sync = ctx.synchronizer(RedisCheck, "redisdb.yaml");

        for port in 1..=3 {
            let snap = snapshot(vec![service("cache", "10.0.0.5", port, &["dd-redisdb"])]);
            let outcome = tokio::time::timeout(Duration::from_secs(1), sync.sync(&snap))
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(outcome, SyncOutcome::Written(_)));
        }
    }

    #[tokio::test]
    async fn test_run_follows_broadcast_until_quit() {
        let mut ctx = TestContext::new();
        let sync = ctx.synchronizer(RedisCheck, "redisdb.yaml");
        let broadcaster = SnapshotBroadcaster::new();
        let shutdown = ShutdownSignal::new();

        let handle = tokio::spawn(sync.run(broadcaster.subscribe(), shutdown.subscribe()));

        broadcaster.publish(snapshot(vec![service("cache", "10.0.0.5", 6379, &["dd-redisdb"])]));
        let event = tokio::time::timeout(Duration::from_secs(5), ctx.events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.check, "redisdb");

        shutdown.trigger();
        handle.await.unwrap().unwrap();
        let written = std::fs::read_to_string(ctx.path("redisdb.yaml")).unwrap();
        assert!(written.contains("host: 10.0.0.5"));
    }

    #[tokio::test]
    async fn test_recoverable_integrity_failure_keeps_running() {
        let ctx = TestContext::new();
        let sync = ctx
            .synchronizer(RedisCheck, "missing/redisdb.yaml")
            .with_integrity_severity(FailureSeverity::Recoverable);
        let broadcaster = SnapshotBroadcaster::new();
        let shutdown = ShutdownSignal::new();

        let handle = tokio::spawn(sync.run(broadcaster.subscribe(), shutdown.subscribe()));
        broadcaster.publish(snapshot(vec![service("cache", "10.0.0.5", 6379, &["dd-redisdb"])]));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        shutdown.trigger();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_fatal_integrity_failure_ends_run() {
        let ctx = TestContext::new();
        let sync = ctx.synchronizer(RedisCheck, "missing/redisdb.yaml");
        let broadcaster = SnapshotBroadcaster::new();
        let shutdown = ShutdownSignal::new();

        let handle = tokio::spawn(sync.run(broadcaster.subscribe(), shutdown.subscribe()));
        broadcaster.publish(snapshot(vec![service("cache", "10.0.0.5", 6379, &["dd-redisdb"])]));

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.unwrap_err().is_integrity());
    }
}
