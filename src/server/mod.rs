//! HTTP surface: php-fpm status proxy, the self-describing expvar config
//! and the service's own counters.

mod handler;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use warp::Filter;

use crate::config::AppState;
use crate::lifecycle::QuitReceiver;
use crate::{AppError, Result};

pub use handler::self_expvar_instance;

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let php_fpm = warp::path!("php-fpm" / String / String / String / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handler::php_fpm_proxy);

    let expvar = warp::path!("datadog" / "expvar")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handler::expvar_config);

    let vars = warp::path!("debug" / "vars")
        .and(warp::get())
        .and(with_state(state))
        .and_then(handler::debug_vars);

    php_fpm.or(expvar).or(vars).with(warp::trace::request())
}

/// Binds the listener and returns the server future; it resolves once
/// `quit` fires and in-flight requests have drained.
pub fn bind(
    state: Arc<AppState>,
    port: u16,
    mut quit: QuitReceiver,
) -> Result<(SocketAddr, impl Future<Output = ()>)> {
    warp::serve(routes(state))
        .try_bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            quit.recv().await;
        })
        .map_err(|e| AppError::Io(format!("Could not listen on port {}: {}", port, e)))
}
