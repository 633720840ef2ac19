use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Serialize;

use crate::sync::CheckKind;
use crate::types::ServiceRecord;

/// See https://github.com/DataDog/integrations-core/tree/master/redisdb
pub struct RedisCheck;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedisInstance {
    pub host: String,
    pub port: u16,
    pub tags: Vec<String>,
}

impl Ord for RedisInstance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.host
            .cmp(&other.host)
            .then_with(|| self.port.cmp(&other.port))
            .then_with(|| self.tags.cmp(&other.tags))
    }
}

impl PartialOrd for RedisInstance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[async_trait]
impl CheckKind for RedisCheck {
    type Instance = RedisInstance;

    fn name(&self) -> &'static str {
        "redisdb"
    }

    async fn project(&self, service: &ServiceRecord) -> Option<RedisInstance> {
        Some(RedisInstance {
            host: service.address.clone(),
            port: service.port,
            tags: vec![format!("service:{}", service.name)],
        })
    }
}
