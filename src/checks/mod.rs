//! Agent check types: one [`CheckKind`](crate::sync::CheckKind) per check.

mod go_expvar;
mod php_fpm;
mod rabbitmq;
mod redisdb;
mod tcp;

pub use go_expvar::{
    CachedConfigSource, ExpvarInstance, GoExpvarCheck, HttpConfigSource, RemoteConfigSource,
    SELF_DESCRIBE_PATH,
};
pub use php_fpm::{PhpFpmCheck, PhpFpmInstance};
pub use rabbitmq::{RabbitMqCheck, RabbitMqInstance};
pub use redisdb::{RedisCheck, RedisInstance};
pub use tcp::{TcpCheck, TcpInstance};
