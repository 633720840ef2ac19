use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::RabbitMqCredentials;
use crate::sync::CheckKind;
use crate::types::ServiceRecord;

/// See https://github.com/DataDog/integrations-core/tree/master/rabbitmq
pub struct RabbitMqCheck {
    credentials: RabbitMqCredentials,
}

impl RabbitMqCheck {
    pub fn new(credentials: RabbitMqCredentials) -> Self {
        Self { credentials }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RabbitMqInstance {
    #[serde(rename = "rabbitmq_api_url")]
    pub url: String,
    #[serde(rename = "rabbitmq_user")]
    pub username: String,
    #[serde(rename = "rabbitmq_pass")]
    pub password: String,
    pub tags: Vec<String>,
}

impl Ord for RabbitMqInstance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.url
            .cmp(&other.url)
            .then_with(|| self.tags.cmp(&other.tags))
            .then_with(|| self.username.cmp(&other.username))
            .then_with(|| self.password.cmp(&other.password))
    }
}

impl PartialOrd for RabbitMqInstance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[async_trait]
impl CheckKind for RabbitMqCheck {
    type Instance = RabbitMqInstance;

    fn name(&self) -> &'static str {
        "rabbitmq"
    }

    async fn project(&self, service: &ServiceRecord) -> Option<RabbitMqInstance> {
        Some(RabbitMqInstance {
            url: format!("http://{}:{}/api/", service.address, service.port),
            username: self.credentials.username.clone(),
            password: self.credentials.password.clone(),
            tags: vec![format!("service:{}", service.name)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::service;

    #[tokio::test]
    async fn test_project_uses_credentials() {
        let check = RabbitMqCheck::new(RabbitMqCredentials {
            username: "monitor".to_string(),
            password: "s3cret".to_string(),
        });
        let got = check
            .project(&service("queue", "10.0.0.7", 15672, &["dd-rabbitmq"]))
            .await
            .unwrap();

        assert_eq!(got.url, "http://10.0.0.7:15672/api/");
        assert_eq!(got.username, "monitor");
        assert_eq!(got.password, "s3cret");
        assert_eq!(got.tags, vec!["service:queue"]);
    }

    #[tokio::test]
    async fn test_field_names() {
        let check = RabbitMqCheck::new(RabbitMqCredentials::default());
        let got = check
            .project(&service("queue", "10.0.0.7", 15672, &[]))
            .await
            .unwrap();
        let yaml = serde_yaml::to_string(&got).unwrap();

        assert!(yaml.contains("rabbitmq_api_url: http://10.0.0.7:15672/api/"));
        assert!(yaml.contains("rabbitmq_user: guest"));
        assert!(yaml.contains("rabbitmq_pass: guest"));
    }
}
