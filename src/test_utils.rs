use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::checks::{ExpvarInstance, RemoteConfigSource};
use crate::metrics::ServiceMetrics;
use crate::proxy::fastcgi::{self, END_REQUEST, PARAMS, STDIN, STDOUT};
use crate::registry::ServiceRegistry;
use crate::reload::AgentReloader;
use crate::sync::{CheckKind, CheckSynchronizer, ContentHashStore, EVENT_CHANNEL_CAPACITY};
use crate::types::{ChangeEvent, ServiceRecord, Snapshot};
use crate::{AppError, Result};

/// A service whose id is its name.
pub fn service(name: &str, address: &str, port: u16, tags: &[&str]) -> ServiceRecord {
    ServiceRecord {
        id: name.to_string(),
        name: name.to_string(),
        address: address.to_string(),
        port,
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

pub fn snapshot(services: Vec<ServiceRecord>) -> Snapshot {
    services.into_iter().collect()
}

pub fn expvar_instance(url: &str) -> ExpvarInstance {
    ExpvarInstance {
        expvar_url: url.to_string(),
        tags: vec!["project:test".to_string()],
        metrics: vec![BTreeMap::from([("path".to_string(), "requests".to_string())])],
    }
}

/// Temp config directory plus the shared pieces a synchronizer needs.
pub struct TestContext {
    pub _dir: TempDir, // Kept so the directory outlives the context
    pub hashes: Arc<ContentHashStore>,
    pub metrics: Arc<ServiceMetrics>,
    pub events_tx: mpsc::Sender<ChangeEvent>,
    pub events_rx: mpsc::Receiver<ChangeEvent>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_event_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (events_tx, events_rx) = mpsc::channel(capacity);
        Self {
            _dir: dir,
            hashes: Arc::new(ContentHashStore::new()),
            metrics: Arc::new(ServiceMetrics::new()),
            events_tx,
            events_rx,
        }
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self._dir.path().join(file)
    }

    pub fn synchronizer<K: CheckKind>(&self, kind: K, file: &str) -> CheckSynchronizer<K> {
        CheckSynchronizer::new(
            kind,
            self.path(file),
            self.hashes.clone(),
            self.events_tx.clone(),
            self.metrics.clone(),
        )
    }
}

/// Registry returning a fixed snapshot, or an error while `failing` is set.
pub struct StaticRegistry {
    snapshot: Mutex<Snapshot>,
    failing: AtomicBool,
}

impl StaticRegistry {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServiceRegistry for StaticRegistry {
    async fn list_services(&self) -> Result<Snapshot> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Registry("registry unavailable".to_string()));
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn node_name(&self) -> Result<String> {
        Ok("test-node".to_string())
    }
}

pub struct RecordingReloader {
    calls: AtomicUsize,
    fail: bool,
}

impl RecordingReloader {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentReloader for RecordingReloader {
    async fn reload(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::Reload("reload command exited with 1".to_string()));
        }
        Ok(())
    }
}

/// In-memory self-description endpoints with per-URL call counts.
#[derive(Default)]
pub struct FakeConfigSource {
    responses: HashMap<String, ExpvarInstance>,
    failing: Vec<String>,
    failing_once: Vec<String>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, instance: ExpvarInstance) -> Self {
        self.responses.insert(url.to_string(), instance);
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.push(url.to_string());
        self
    }

    /// Fails the first lookup of `url`, then answers normally.
    pub fn failing_once(mut self, url: &str) -> Self {
        self.failing_once.push(url.to_string());
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RemoteConfigSource for FakeConfigSource {
    async fn fetch(&self, url: &str) -> Result<ExpvarInstance> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let fail_now = call == 1 && self.failing_once.iter().any(|u| u == url);
        if fail_now || self.failing.iter().any(|u| u == url) {
            return Err(AppError::Enrichment(format!("{} returned 503", url)));
        }
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::Enrichment(format!("{} returned 404", url)))
    }
}

/// Decodes a FastCGI name-value pair stream.
pub fn decode_params(mut buf: Bytes) -> HashMap<String, String> {
    let mut params = HashMap::new();
    while !buf.is_empty() {
        let name_len = fastcgi::read_length(&mut buf).unwrap();
        let value_len = fastcgi::read_length(&mut buf).unwrap();
        let name = buf.split_to(name_len);
        let value = buf.split_to(value_len);
        params.insert(
            String::from_utf8(name.to_vec()).unwrap(),
            String::from_utf8(value.to_vec()).unwrap(),
        );
    }
    params
}

/// One-shot FastCGI responder on a random port. Answers the first request
/// with `stdout` and yields the params it was sent.
pub async fn spawn_fastcgi_responder(
    stdout: &'static [u8],
) -> (u16, JoinHandle<HashMap<String, String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut params = BytesMut::new();
        loop {
            let (kind, content) = fastcgi::read_record(&mut stream).await.unwrap();
            match kind {
                PARAMS => params.extend_from_slice(&content),
                STDIN if content.is_empty() => break,
                _ => {}
            }
        }

        let mut reply = BytesMut::new();
        fastcgi::put_record(&mut reply, STDOUT, stdout);
        fastcgi::put_record(&mut reply, STDOUT, &[]);
        fastcgi::put_record(&mut reply, END_REQUEST, &[0u8; 8]);
        stream.write_all(&reply).await.unwrap();
        stream.flush().await.unwrap();

        decode_params(params.freeze())
    });

    (port, handle)
}
