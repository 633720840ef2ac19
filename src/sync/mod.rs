//! The per-check pipeline: filter, project, sort, render, diff, write, notify.

pub mod document;
mod hash_store;
mod hasher;
mod synchronizer;
mod writer;

use async_trait::async_trait;
use serde::Serialize;

use crate::types::ServiceRecord;

pub use hash_store::ContentHashStore;
pub use hasher::ContentHasher;
pub use synchronizer::{CheckSynchronizer, SyncOutcome, EVENT_CHANNEL_CAPACITY};
pub use writer::write_atomic;

/// Everything that differs between two agent checks.
///
/// The `Ord` on [`CheckKind::Instance`] is the order instances are written
/// in, so it must be a total order over all fields that reach the file.
#[async_trait]
pub trait CheckKind: Send + Sync + 'static {
    type Instance: Serialize + Ord + Send + Sync;

    /// Check name; also the suffix of the opt-in tag `dd-<name>`.
    fn name(&self) -> &'static str;

    fn tag(&self) -> String {
        format!("dd-{}", self.name())
    }

    fn wants(&self, service: &ServiceRecord) -> bool {
        service.has_tag(&self.tag())
    }

    /// Maps an opted-in service to its check instance, or `None` to leave it
    /// out of this cycle.
    async fn project(&self, service: &ServiceRecord) -> Option<Self::Instance>;
}
