//! HTTP to FastCGI bridge for php-fpm status and ping pages.

pub(crate) mod fastcgi;

use std::time::Duration;

pub use fastcgi::{CgiOutput, FastCgiClient, FastCgiResponse};

use crate::Result;

const QUERY_STRING: &str = "json=1";
const SERVER_SOFTWARE: &str = "go / fcgiclient ";

/// The php-fpm pool to ask and which of its pages.
#[derive(Debug, Clone)]
pub struct StatusTarget {
    pub project: String,
    pub host: String,
    pub port: u16,
    pub endpoint: String,
}

impl StatusTarget {
    pub fn script_path(&self) -> String {
        format!("/{}/internal/{}", self.project, self.endpoint)
    }

    pub fn params(&self) -> Vec<(String, String)> {
        let script = self.script_path();
        vec![
            ("REQUEST_METHOD".to_string(), "GET".to_string()),
            ("SCRIPT_FILENAME".to_string(), script.clone()),
            ("SCRIPT_NAME".to_string(), script),
            ("SERVER_SOFTWARE".to_string(), SERVER_SOFTWARE.to_string()),
            ("QUERY_STRING".to_string(), QUERY_STRING.to_string()),
        ]
    }
}

/// One FastCGI round trip; no retries.
pub async fn fetch_status(target: &StatusTarget, timeout: Duration) -> Result<CgiOutput> {
    let client = FastCgiClient::new(&target.host, target.port).with_timeout(timeout);
    let response = client
        .request(&target.params(), QUERY_STRING.as_bytes())
        .await?;

    if !response.stderr.is_empty() {
        tracing::debug!(
            script = %target.script_path(),
            stderr = %String::from_utf8_lossy(&response.stderr),
            "php-fpm wrote to stderr"
        );
    }

    response.parse_stdout()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> StatusTarget {
        StatusTarget {
            project: "shop".to_string(),
            host: "10.0.0.4".to_string(),
            port: 9000,
            endpoint: "status".to_string(),
        }
    }

    #[test]
    fn test_script_path() {
        assert_eq!(target().script_path(), "/shop/internal/status");
    }

    #[test]
    fn test_params_environment() {
        let params = target().params();
        let get = |name: &str| {
            params
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("REQUEST_METHOD"), Some("GET"));
        assert_eq!(get("SCRIPT_FILENAME"), Some("/shop/internal/status"));
        assert_eq!(get("SCRIPT_NAME"), Some("/shop/internal/status"));
        assert_eq!(get("QUERY_STRING"), Some("json=1"));
    }
}
