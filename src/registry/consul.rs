use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::ServiceRegistry;
use crate::types::{ServiceRecord, Snapshot};
use crate::{AppError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Local Consul agent over its HTTP API.
pub struct ConsulRegistry {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    address: String,
    #[serde(default)]
    port: u16,
}

#[derive(Debug, Deserialize)]
struct AgentSelf {
    #[serde(rename = "Config")]
    config: AgentSelfConfig,
}

#[derive(Debug, Deserialize)]
struct AgentSelfConfig {
    #[serde(rename = "NodeName")]
    node_name: String,
}

impl ConsulRegistry {
    pub fn new(addr: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("dd-service-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Registry(format!("Could not build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url(addr),
            token,
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::Registry(format!("GET {}: {}", url, e)))?;

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::Registry(format!("Could not decode {}: {}", url, e)))
    }
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    async fn list_services(&self) -> Result<Snapshot> {
        let services: HashMap<String, AgentService> = self.get("/v1/agent/services").await?;
        Ok(services.into_values().map(ServiceRecord::from).collect())
    }

    async fn node_name(&self) -> Result<String> {
        let agent: AgentSelf = self.get("/v1/agent/self").await?;
        Ok(agent.config.node_name)
    }
}

impl From<AgentService> for ServiceRecord {
    fn from(s: AgentService) -> Self {
        ServiceRecord {
            id: s.id,
            name: s.service,
            address: s.address,
            port: s.port,
            tags: s.tags.unwrap_or_default().into_iter().collect::<BTreeSet<_>>(),
        }
    }
}

/// `CONSUL_HTTP_ADDR` may or may not carry a scheme.
fn base_url(addr: &str) -> String {
    let addr = addr.trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}
