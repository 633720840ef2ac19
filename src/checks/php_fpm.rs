use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Serialize;

use crate::sync::CheckKind;
use crate::types::ServiceRecord;

const PING_REPLY: &str = "pong";

/// php-fpm pools are reached through this service's own FastCGI proxy
/// route, since the agent only speaks HTTP.
pub struct PhpFpmCheck {
    listen_port: u16,
}

impl PhpFpmCheck {
    pub fn new(listen_port: u16) -> Self {
        Self { listen_port }
    }

    fn proxy_url(&self, service: &ServiceRecord, endpoint: &str) -> String {
        format!(
            "http://{addr}:{listen}/php-fpm/{project}/{addr}/{port}/{endpoint}",
            addr = service.address,
            listen = self.listen_port,
            project = service.name,
            port = service.port,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhpFpmInstance {
    pub status_url: String,
    pub ping_url: String,
    pub ping_reply: String,
    pub tags: Vec<String>,
}

impl Ord for PhpFpmInstance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ping_url
            .cmp(&other.ping_url)
            .then_with(|| self.status_url.cmp(&other.status_url))
            .then_with(|| self.tags.cmp(&other.tags))
            .then_with(|| self.ping_reply.cmp(&other.ping_reply))
    }
}

impl PartialOrd for PhpFpmInstance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[async_trait]
impl CheckKind for PhpFpmCheck {
    type Instance = PhpFpmInstance;

    fn name(&self) -> &'static str {
        "php-fpm"
    }

    async fn project(&self, service: &ServiceRecord) -> Option<PhpFpmInstance> {
        Some(PhpFpmInstance {
            status_url: self.proxy_url(service, "status"),
            ping_url: self.proxy_url(service, "ping"),
            ping_reply: PING_REPLY.to_string(),
            tags: vec![format!("project:{}", service.name)],
        })
    }
}
