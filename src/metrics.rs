use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct ServiceMetrics {
    pub registry_polls: AtomicU64,
    pub registry_failures: AtomicU64,
    pub registry_services: AtomicUsize,
    pub config_writes: AtomicU64,
    pub config_write_failures: AtomicU64,
    pub enrichment_failures: AtomicU64,
    pub agent_reloads: AtomicU64,
    pub reload_failures: AtomicU64,
    check_instances: RwLock<BTreeMap<&'static str, usize>>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_poll(&self, services: usize) {
        self.registry_polls.fetch_add(1, Ordering::Relaxed);
        self.registry_services.store(services, Ordering::Relaxed);
    }

    pub fn inc_poll_failure(&self) {
        self.registry_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write(&self) {
        self.config_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write_failure(&self) {
        self.config_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_enrichment_failure(&self) {
        self.enrichment_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reload(&self) {
        self.agent_reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reload_failure(&self) {
        self.reload_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_check_instances(&self, check: &'static str, count: usize) {
        if let Ok(mut instances) = self.check_instances.write() {
            instances.insert(check, count);
        }
    }

    pub fn get_reloads(&self) -> u64 {
        self.agent_reloads.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            registry_polls: self.registry_polls.load(Ordering::Relaxed),
            registry_failures: self.registry_failures.load(Ordering::Relaxed),
            registry_services: self.registry_services.load(Ordering::Relaxed),
            config_writes: self.config_writes.load(Ordering::Relaxed),
            config_write_failures: self.config_write_failures.load(Ordering::Relaxed),
            enrichment_failures: self.enrichment_failures.load(Ordering::Relaxed),
            datadog_agent_reloads: self.agent_reloads.load(Ordering::Relaxed),
            reload_failures: self.reload_failures.load(Ordering::Relaxed),
            check_instances: self
                .check_instances
                .read()
                .map(|m| m.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub registry_polls: u64,
    pub registry_failures: u64,
    pub registry_services: usize,
    pub config_writes: u64,
    pub config_write_failures: u64,
    pub enrichment_failures: u64,
    pub datadog_agent_reloads: u64,
    pub reload_failures: u64,
    pub check_instances: BTreeMap<&'static str, usize>,
}

impl MetricsSnapshot {
    /// Paths a go-expvar check can scrape from `/debug/vars`.
    pub const SCALAR_PATHS: [&'static str; 8] = [
        "registry_polls",
        "registry_failures",
        "registry_services",
        "config_writes",
        "config_write_failures",
        "enrichment_failures",
        "datadog_agent_reloads",
        "reload_failures",
    ];
}
