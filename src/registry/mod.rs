//! Service registry access and the snapshot broadcast fed from it.

mod broadcaster;
mod consul;

use async_trait::async_trait;

use crate::types::Snapshot;
use crate::Result;

pub use broadcaster::{run_poll_loop, SnapshotBroadcaster, SnapshotSubscriber};
pub use consul::ConsulRegistry;

/// Read-only view of the registry. Polling must have no side effects.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Every service currently registered with the local agent.
    async fn list_services(&self) -> Result<Snapshot>;

    /// Name of the node the agent runs on.
    async fn node_name(&self) -> Result<String>;
}
