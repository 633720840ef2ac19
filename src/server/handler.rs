use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use warp::http::header::{HeaderValue, CONTENT_TYPE};
use warp::http::StatusCode;
use warp::hyper::Body;
use warp::reply::Response;

use crate::checks::ExpvarInstance;
use crate::config::AppState;
use crate::metrics::MetricsSnapshot;
use crate::proxy::{fetch_status, StatusTarget};
use crate::sync::document::DOCUMENT_PREAMBLE;

const SELF_PROJECT_TAG: &str = "project:datadog-monitor";

fn respond(status: StatusCode, content_type: &str, body: impl Into<Body>) -> Response {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

fn internal_error(message: String) -> Response {
    tracing::error!("{}", message);
    respond(
        StatusCode::INTERNAL_SERVER_ERROR,
        "text/plain; charset=utf-8",
        message,
    )
}

/// `GET /php-fpm/{project}/{ip}/{port}/{type}`
pub async fn php_fpm_proxy(
    project: String,
    ip: String,
    port: String,
    endpoint: String,
    state: Arc<AppState>,
) -> Result<Response, Infallible> {
    let path = format!("/php-fpm/{}/{}/{}/{}", project, ip, port, endpoint);

    let port: u16 = match port.parse() {
        Ok(p) => p,
        Err(e) => {
            return Ok(internal_error(format!(
                "[php-fpm] Invalid port {}: {}",
                port, e
            )))
        }
    };

    let target = StatusTarget {
        project,
        host: ip,
        port,
        endpoint,
    };

    match fetch_status(&target, state.config.proxy_timeout).await {
        Ok(output) => {
            tracing::debug!(bytes = output.body.len(), %path, "[php-fpm] Request complete");
            let status = output
                .status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::OK);
            let content_type = output
                .content_type
                .unwrap_or_else(|| "text/plain; charset=utf-8".to_string());
            Ok(respond(status, &content_type, output.body))
        }
        Err(e) => Ok(internal_error(format!("[php-fpm] {} ({})", e, path))),
    }
}

/// The go-expvar check instance that scrapes this service's own counters.
pub fn self_expvar_instance(state: &AppState) -> ExpvarInstance {
    let mut metrics: Vec<BTreeMap<String, String>> = MetricsSnapshot::SCALAR_PATHS
        .iter()
        .map(|path| [("path".to_string(), path.to_string())].into())
        .collect();
    metrics.extend(state.config.checks.iter().map(|check| {
        [(
            "path".to_string(),
            format!("check_instances/{}", check.name()),
        )]
        .into()
    }));

    ExpvarInstance {
        expvar_url: format!("http://127.0.0.1:{}/debug/vars", state.config.listen_port),
        tags: vec![SELF_PROJECT_TAG.to_string()],
        metrics,
    }
}

/// `GET /datadog/expvar`
pub async fn expvar_config(state: Arc<AppState>) -> Result<Response, Infallible> {
    match serde_yaml::to_string(&self_expvar_instance(&state)) {
        Ok(body) => Ok(respond(
            StatusCode::OK,
            "text/yaml",
            format!("{}{}", DOCUMENT_PREAMBLE, body),
        )),
        Err(e) => Ok(internal_error(format!(
            "[expvar] Could not marshal YAML: {}",
            e
        ))),
    }
}

/// `GET /debug/vars`, shaped like Go's expvar output.
pub async fn debug_vars(state: Arc<AppState>) -> Result<Response, Infallible> {
    let reload_state = *state.reload_state.lock().await;

    let mut vars = match serde_json::to_value(state.metrics.snapshot()) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) => serde_json::Map::new(),
        Err(e) => return Ok(internal_error(format!("[vars] Could not encode: {}", e))),
    };
    vars.insert(
        "cmdline".to_string(),
        serde_json::json!(std::env::args().collect::<Vec<_>>()),
    );
    vars.insert("reload_state".to_string(), serde_json::json!(reload_state));

    match serde_json::to_vec(&vars) {
        Ok(body) => Ok(respond(
            StatusCode::OK,
            "application/json; charset=utf-8",
            body,
        )),
        Err(e) => Ok(internal_error(format!("[vars] Could not encode: {}", e))),
    }
}
