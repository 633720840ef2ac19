use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use dd_service_sync::checks::{
    CachedConfigSource, GoExpvarCheck, HttpConfigSource, PhpFpmCheck, RabbitMqCheck, RedisCheck,
    TcpCheck,
};
use dd_service_sync::config::{
    split_command, AppConfig, AppState, CheckPaths, CheckType, EnrichmentConfig, FailureSeverity,
    RabbitMqCredentials, DEFAULT_CONSUL_ADDR, DEFAULT_RELOAD_COMMAND,
};
use dd_service_sync::lifecycle::ShutdownSignal;
use dd_service_sync::metrics::ServiceMetrics;
use dd_service_sync::registry::{run_poll_loop, ConsulRegistry, ServiceRegistry, SnapshotBroadcaster};
use dd_service_sync::reload::{CommandReloader, ReloadCoordinator};
use dd_service_sync::sync::{
    CheckKind, CheckSynchronizer, ContentHashStore, EVENT_CHANNEL_CAPACITY,
};
use dd_service_sync::types::ChangeEvent;

#[derive(Parser)]
#[command(name = "dd-service-sync")]
#[command(about = "Keeps Datadog agent check configuration in sync with Consul")]
struct Cli {
    #[arg(long, env = "NOMAD_PORT_http", default_value = "4000")]
    listen_port: u16,

    #[arg(long, env = "CONSUL_HTTP_ADDR", default_value = DEFAULT_CONSUL_ADDR)]
    consul_addr: String,

    #[arg(long, env = "CONSUL_HTTP_TOKEN", hide_env_values = true)]
    consul_token: Option<String>,

    /// Seconds between registry polls.
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "5")]
    poll_interval: u64,

    /// Seconds between reload ticks.
    #[arg(long, env = "RELOAD_INTERVAL_SECS", default_value = "5")]
    reload_interval: u64,

    /// Count and log reloads without running the reload command. Any value
    /// other than empty, `0`, `false`, `no` or `off` turns it on.
    #[arg(
        long,
        env = "DONT_RELOAD_DATADOG",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    dont_reload: bool,

    #[arg(long, env = "DATADOG_RELOAD_COMMAND", default_value = DEFAULT_RELOAD_COMMAND)]
    reload_command: String,

    #[arg(long, env, default_value = "/etc/dd-agent/conf.d/php_fpm.yaml")]
    php_fpm_config_file: PathBuf,

    #[arg(long, env, default_value = "/etc/dd-agent/conf.d/go_expvar.yaml")]
    go_expvar_config_file: PathBuf,

    #[arg(long, env, default_value = "/etc/dd-agent/conf.d/redisdb.yaml")]
    redisdb_config_file: PathBuf,

    #[arg(long, env, default_value = "/etc/dd-agent/conf.d/tcp_check.yaml")]
    tcp_check_config_file: PathBuf,

    #[arg(long, env, default_value = "/etc/dd-agent/conf.d/rabbitmq.yaml")]
    rabbitmq_config_file: PathBuf,

    #[arg(long, env, default_value = "guest")]
    rabbitmq_username: String,

    #[arg(long, env, default_value = "guest", hide_env_values = true)]
    rabbitmq_password: String,

    /// Checks to keep in sync.
    #[arg(
        long,
        env = "ENABLED_CHECKS",
        value_enum,
        value_delimiter = ',',
        default_values = ["php-fpm", "go-expvar", "redisdb", "tcp-check", "rabbitmq"]
    )]
    checks: Vec<CheckType>,

    #[arg(long, env = "ENRICHMENT_CACHE_TTL_SECS", default_value = "1800")]
    enrichment_ttl: u64,

    #[arg(long, env = "ENRICHMENT_NEGATIVE_TTL_SECS", default_value = "30")]
    enrichment_negative_ttl: u64,

    #[arg(long, env = "ENRICHMENT_TIMEOUT_MS", default_value = "5000")]
    enrichment_timeout: u64,

    /// What a render or temp-file failure does.
    #[arg(long, env, value_enum, default_value = "fatal")]
    on_integrity_failure: FailureSeverity,

    /// What a failed reload command does.
    #[arg(long, env, value_enum, default_value = "fatal")]
    on_reload_failure: FailureSeverity,

    #[arg(long, env = "PROXY_TIMEOUT_MS", default_value = "5000")]
    proxy_timeout: u64,

    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value = "5")]
    shutdown_timeout: u64,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> AppConfig {
        let mut checks = self.checks;
        checks.sort();
        checks.dedup();

        AppConfig {
            listen_port: self.listen_port,
            consul_addr: self.consul_addr,
            consul_token: self.consul_token.filter(|t| !t.is_empty()),
            poll_interval: Duration::from_secs(self.poll_interval),
            reload_interval: Duration::from_secs(self.reload_interval),
            dont_reload: self.dont_reload,
            reload_command: split_command(&self.reload_command),
            paths: CheckPaths {
                php_fpm: self.php_fpm_config_file,
                go_expvar: self.go_expvar_config_file,
                redisdb: self.redisdb_config_file,
                tcp_check: self.tcp_check_config_file,
                rabbitmq: self.rabbitmq_config_file,
            },
            rabbitmq: RabbitMqCredentials {
                username: self.rabbitmq_username,
                password: self.rabbitmq_password,
            },
            checks,
            enrichment: EnrichmentConfig {
                ttl: Duration::from_secs(self.enrichment_ttl),
                negative_ttl: Duration::from_secs(self.enrichment_negative_ttl),
                timeout: Duration::from_millis(self.enrichment_timeout),
            },
            on_integrity_failure: self.on_integrity_failure,
            on_reload_failure: self.on_reload_failure,
            proxy_timeout: Duration::from_millis(self.proxy_timeout),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
            log_level: self.log_level,
        }
    }
}

type TaskResult = (&'static str, dd_service_sync::Result<()>);

/// Everything a check synchronizer task shares with the others.
struct SyncContext {
    config: AppConfig,
    broadcaster: Arc<SnapshotBroadcaster>,
    hashes: Arc<ContentHashStore>,
    events: mpsc::Sender<ChangeEvent>,
    metrics: Arc<ServiceMetrics>,
    shutdown: ShutdownSignal,
}

impl SyncContext {
    fn spawn<K: CheckKind>(&self, tasks: &mut JoinSet<TaskResult>, check: CheckType, kind: K) {
        let path = self.config.paths.for_check(check).clone();
        tracing::info!(check = check.name(), path = %path.display(), "Starting check synchronizer");

        let synchronizer = CheckSynchronizer::new(
            kind,
            path,
            self.hashes.clone(),
            self.events.clone(),
            self.metrics.clone(),
        )
        .with_integrity_severity(self.config.on_integrity_failure);
        let snapshots = self.broadcaster.subscribe();
        let quit = self.shutdown.subscribe();

        tasks.spawn(async move { (check.name(), synchronizer.run(snapshots, quit).await) });
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config();

    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_writer(std::io::stderr)
        .init();

    let registry: Arc<dyn ServiceRegistry> = Arc::new(ConsulRegistry::new(
        &config.consul_addr,
        config.consul_token.clone(),
    )?);

    match registry.node_name().await {
        Ok(node) => tracing::info!(node = %node, consul = %config.consul_addr, "Connected to consul"),
        Err(e) => {
            tracing::error!("Could not reach consul agent: {}", e);
            std::process::exit(1);
        }
    }

    let reloader = Arc::new(CommandReloader::new(&config.reload_command)?);

    let shutdown = ShutdownSignal::new();
    let metrics = Arc::new(ServiceMetrics::new());
    let broadcaster = Arc::new(SnapshotBroadcaster::new());
    let hashes = Arc::new(ContentHashStore::new());
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let coordinator = ReloadCoordinator::new(
        events_rx,
        reloader,
        metrics.clone(),
        config.reload_interval,
    )
    .suppressed(config.dont_reload)
    .with_failure_severity(config.on_reload_failure);

    let state = Arc::new(AppState {
        config: config.clone(),
        metrics: metrics.clone(),
        reload_state: coordinator.state_handle(),
    });

    let mut tasks: JoinSet<TaskResult> = JoinSet::new();

    let poll = run_poll_loop(
        registry,
        broadcaster.clone(),
        metrics.clone(),
        config.poll_interval,
        shutdown.subscribe(),
    );
    tasks.spawn(async move {
        poll.await;
        ("registry", Ok(()))
    });

    let reload_quit = shutdown.subscribe();
    tasks.spawn(async move { ("reloader", coordinator.run(reload_quit).await) });

    let sync = SyncContext {
        config: config.clone(),
        broadcaster,
        hashes,
        events: events_tx,
        metrics: metrics.clone(),
        shutdown: shutdown.clone(),
    };

    for &check in &config.checks {
        match check {
            CheckType::PhpFpm => sync.spawn(&mut tasks, check, PhpFpmCheck::new(config.listen_port)),
            CheckType::GoExpvar => {
                let source = Arc::new(CachedConfigSource::new(
                    Arc::new(HttpConfigSource::new(config.enrichment.timeout)?),
                    &config.enrichment,
                ));
                sync.spawn(&mut tasks, check, GoExpvarCheck::new(source, metrics.clone()));
            }
            CheckType::Redisdb => sync.spawn(&mut tasks, check, RedisCheck),
            CheckType::TcpCheck => sync.spawn(&mut tasks, check, TcpCheck),
            CheckType::Rabbitmq => sync.spawn(
                &mut tasks,
                check,
                RabbitMqCheck::new(config.rabbitmq.clone()),
            ),
        }
    }
    drop(sync);

    let (addr, server) =
        dd_service_sync::server::bind(state.clone(), config.listen_port, shutdown.subscribe())?;
    let server = tokio::spawn(server);
    tracing::info!(%addr, "Listening for http requests");

    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let mut failed = false;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down gracefully... (SIGINT)");
        },
        _ = async {
            #[cfg(unix)]
            {
                terminate.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            tracing::info!("Shutting down gracefully... (SIGTERM)");
        },
        name = first_failure(&mut tasks) => {
            tracing::error!(task = name, "Fatal error, shutting down");
            failed = true;
        }
    }

    shutdown.trigger();

    match tokio::time::timeout(config.shutdown_timeout, server).await {
        Ok(Ok(())) => tracing::info!("Http server stopped"),
        Ok(Err(e)) => tracing::warn!("Http server task failed: {}", e),
        Err(_) => tracing::warn!(
            timeout_sec = config.shutdown_timeout.as_secs(),
            "Http server did not stop in time"
        ),
    }
    tasks.abort_all();

    tracing::info!("Shutdown complete");
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Resolves with the name of the first task that returns an error or panics.
/// Tasks that end cleanly are ignored.
async fn first_failure(tasks: &mut JoinSet<TaskResult>) -> &'static str {
    loop {
        match tasks.join_next().await {
            Some(Ok((_, Ok(())))) => continue,
            Some(Ok((name, Err(e)))) => {
                tracing::error!(task = name, error = %e, "Task failed");
                return name;
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Task panicked");
                return "unknown";
            }
            None => std::future::pending::<()>().await,
        }
    }
}
