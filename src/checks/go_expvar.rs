use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EnrichmentConfig;
use crate::metrics::ServiceMetrics;
use crate::sync::CheckKind;
use crate::types::ServiceRecord;
use crate::{AppError, Result};

const CACHE_CAPACITY: u64 = 10_000;

/// Route every go service exposes to describe its own expvar check.
pub const SELF_DESCRIBE_PATH: &str = "/datadog/expvar";

/// Field order is the write order, so the derived `Ord` is the intended
/// total order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpvarInstance {
    #[serde(default)]
    pub expvar_url: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<BTreeMap<String, String>>,
}

/// Where go-expvar instances come from: each service describes itself.
#[async_trait]
pub trait RemoteConfigSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ExpvarInstance>;
}

pub struct HttpConfigSource {
    client: Client,
}

impl HttpConfigSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Enrichment(format!("Could not build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteConfigSource for HttpConfigSource {
    async fn fetch(&self, url: &str) -> Result<ExpvarInstance> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::Enrichment(format!("Could not GET url '{}': {}", url, e)))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::Enrichment(format!("Could not read response '{}': {}", url, e)))?;

        serde_yaml::from_slice(&body).map_err(|e| {
            AppError::Enrichment(format!("Could not parse response as YAML '{}': {}", url, e))
        })
    }
}

/// Caches answers per URL for `ttl` and failures for `negative_ttl`, so an
/// unchanged or unreachable service is not queried on every snapshot.
pub struct CachedConfigSource {
    inner: Arc<dyn RemoteConfigSource>,
    hits: Cache<String, Arc<ExpvarInstance>>,
    failures: Cache<String, String>,
}

impl CachedConfigSource {
    pub fn new(inner: Arc<dyn RemoteConfigSource>, config: &EnrichmentConfig) -> Self {
        Self {
            inner,
            hits: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(config.ttl)
                .build(),
            failures: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(config.negative_ttl)
                .build(),
        }
    }
}

#[async_trait]
impl RemoteConfigSource for CachedConfigSource {
    async fn fetch(&self, url: &str) -> Result<ExpvarInstance> {
        if let Some(hit) = self.hits.get(url).await {
            return Ok(hit.as_ref().clone());
        }
        if let Some(reason) = self.failures.get(url).await {
            return Err(AppError::Enrichment(format!("{} (cached failure)", reason)));
        }

        match self.inner.fetch(url).await {
            Ok(instance) => {
                self.hits
                    .insert(url.to_string(), Arc::new(instance.clone()))
                    .await;
                Ok(instance)
            }
            Err(e) => {
                self.failures.insert(url.to_string(), e.to_string()).await;
                Err(e)
            }
        }
    }
}

pub struct GoExpvarCheck {
    source: Arc<dyn RemoteConfigSource>,
    metrics: Arc<ServiceMetrics>,
}

impl GoExpvarCheck {
    pub fn new(source: Arc<dyn RemoteConfigSource>, metrics: Arc<ServiceMetrics>) -> Self {
        Self { source, metrics }
    }
}

#[async_trait]
impl CheckKind for GoExpvarCheck {
    type Instance = ExpvarInstance;

    fn name(&self) -> &'static str {
        "go-expvar"
    }

    async fn project(&self, service: &ServiceRecord) -> Option<ExpvarInstance> {
        let url = format!(
            "http://{}:{}{}",
            service.address, service.port, SELF_DESCRIBE_PATH
        );

        match self.source.fetch(&url).await {
            Ok(instance) if instance.expvar_url.is_empty() => {
                tracing::debug!(service = %service.name, %url, "Remote config has no expvar_url");
                None
            }
            Ok(instance) => Some(instance),
            Err(e) => {
                self.metrics.inc_enrichment_failure();
                tracing::warn!(service = %service.name, %url, error = %e, "Could not get remote config");
                None
            }
        }
    }
}
