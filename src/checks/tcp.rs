use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Serialize;

use crate::sync::CheckKind;
use crate::types::ServiceRecord;

const CHECK_TIMEOUT_SECS: u32 = 5;

pub struct TcpCheck;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TcpInstance {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub timeout: u32,
    pub collect_response_time: bool,
    pub tags: Vec<String>,
}

// Port first keeps the file grouped by what is being probed.
impl Ord for TcpInstance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.port
            .cmp(&other.port)
            .then_with(|| self.host.cmp(&other.host))
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.tags.cmp(&other.tags))
    }
}

impl PartialOrd for TcpInstance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[async_trait]
impl CheckKind for TcpCheck {
    type Instance = TcpInstance;

    fn name(&self) -> &'static str {
        "tcp-check"
    }

    async fn project(&self, service: &ServiceRecord) -> Option<TcpInstance> {
        Some(TcpInstance {
            name: service.name.clone(),
            host: service.address.clone(),
            port: service.port,
            timeout: CHECK_TIMEOUT_SECS,
            collect_response_time: true,
            tags: vec![format!("service:{}", service.name)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::document;
    use crate::test_utils::service;

    #[tokio::test]
    async fn test_rendered_schema() {
        let instance = TcpCheck
            .project(&service("ssh", "10.0.0.3", 22, &["dd-tcp-check"]))
            .await
            .unwrap();
        let text = String::from_utf8(document::render(&[instance]).unwrap()).unwrap();

        assert!(text.starts_with("---\ninit_config: []\ninstances:\n- name: ssh\n"));
        let keys = ["host:", "port: 22", "timeout: 5", "collect_response_time: true", "tags:"];
        let positions: Vec<usize> = keys.iter().map(|k| text.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_same_port_ordered_by_host() {
        let mut items = vec![
            TcpCheck.project(&service("b", "10.0.0.2", 80, &[])).await.unwrap(),
            TcpCheck.project(&service("a", "10.0.0.9", 22, &[])).await.unwrap(),
            TcpCheck.project(&service("c", "10.0.0.1", 80, &[])).await.unwrap(),
        ];
        items.sort();
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c", "b"]);
    }
}
