pub mod checks;
pub mod config;
pub mod lifecycle;
pub mod metrics;
pub mod proxy;
pub mod registry;
pub mod reload;
pub mod server;
pub mod sync;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use config::{AppConfig, AppState};
pub use types::error::{AppError, Result};
