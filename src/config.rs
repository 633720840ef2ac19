use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;

use crate::metrics::ServiceMetrics;
use crate::reload::SharedReloadState;

pub const DEFAULT_LISTEN_PORT: u16 = 4000;
pub const DEFAULT_CONSUL_ADDR: &str = "127.0.0.1:8500";
pub const DEFAULT_RELOAD_COMMAND: &str = "/usr/sbin/service datadog-agent reload";

/// What to do when a failure class that retrying cannot fix shows up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FailureSeverity {
    /// Stop the process and let the supervisor restart it.
    #[default]
    Fatal,
    /// Log it and carry on with the next cycle.
    Recoverable,
}

/// The agent checks this service knows how to configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum CheckType {
    #[value(name = "php-fpm")]
    PhpFpm,
    #[value(name = "go-expvar")]
    GoExpvar,
    #[value(name = "redisdb")]
    Redisdb,
    #[value(name = "tcp-check")]
    TcpCheck,
    #[value(name = "rabbitmq")]
    Rabbitmq,
}

impl CheckType {
    pub const ALL: [CheckType; 5] = [
        CheckType::PhpFpm,
        CheckType::GoExpvar,
        CheckType::Redisdb,
        CheckType::TcpCheck,
        CheckType::Rabbitmq,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CheckType::PhpFpm => "php-fpm",
            CheckType::GoExpvar => "go-expvar",
            CheckType::Redisdb => "redisdb",
            CheckType::TcpCheck => "tcp-check",
            CheckType::Rabbitmq => "rabbitmq",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckPaths {
    pub php_fpm: PathBuf,
    pub go_expvar: PathBuf,
    pub redisdb: PathBuf,
    pub tcp_check: PathBuf,
    pub rabbitmq: PathBuf,
}

impl CheckPaths {
    pub fn for_check(&self, check: CheckType) -> &PathBuf {
        match check {
            CheckType::PhpFpm => &self.php_fpm,
            CheckType::GoExpvar => &self.go_expvar,
            CheckType::Redisdb => &self.redisdb,
            CheckType::TcpCheck => &self.tcp_check,
            CheckType::Rabbitmq => &self.rabbitmq,
        }
    }
}

impl Default for CheckPaths {
    fn default() -> Self {
        let conf_d = PathBuf::from("/etc/dd-agent/conf.d");
        Self {
            php_fpm: conf_d.join("php_fpm.yaml"),
            go_expvar: conf_d.join("go_expvar.yaml"),
            redisdb: conf_d.join("redisdb.yaml"),
            tcp_check: conf_d.join("tcp_check.yaml"),
            rabbitmq: conf_d.join("rabbitmq.yaml"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RabbitMqCredentials {
    pub username: String,
    pub password: String,
}

impl Default for RabbitMqCredentials {
    fn default() -> Self {
        Self {
            username: "guest".to_string(),
            password: "guest".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub ttl: Duration,
    pub negative_ttl: Duration,
    pub timeout: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            negative_ttl: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_port: u16,
    pub consul_addr: String,
    pub consul_token: Option<String>,
    pub poll_interval: Duration,
    pub reload_interval: Duration,
    pub dont_reload: bool,
    pub reload_command: Vec<String>,
    pub paths: CheckPaths,
    pub rabbitmq: RabbitMqCredentials,
    pub checks: Vec<CheckType>,
    pub enrichment: EnrichmentConfig,
    pub on_integrity_failure: FailureSeverity,
    pub on_reload_failure: FailureSeverity,
    pub proxy_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            consul_addr: DEFAULT_CONSUL_ADDR.to_string(),
            consul_token: None,
            poll_interval: Duration::from_secs(5),
            reload_interval: Duration::from_secs(5),
            dont_reload: false,
            reload_command: split_command(DEFAULT_RELOAD_COMMAND),
            paths: CheckPaths::default(),
            rabbitmq: RabbitMqCredentials::default(),
            checks: CheckType::ALL.to_vec(),
            enrichment: EnrichmentConfig::default(),
            on_integrity_failure: FailureSeverity::Fatal,
            on_reload_failure: FailureSeverity::Fatal,
            proxy_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            log_level: "info".to_string(),
        }
    }
}

/// Whitespace split; the reload command never needs shell quoting.
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Read-only state shared with the HTTP handlers.
pub struct AppState {
    pub config: AppConfig,
    pub metrics: Arc<ServiceMetrics>,
    pub reload_state: SharedReloadState,
}
