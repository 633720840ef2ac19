use std::collections::HashMap;
use std::path::Path;

use tokio::sync::RwLock;

use super::hasher::ContentHasher;
use crate::types::ContentHash;

/// Last known digest of each managed config file, keyed by check name.
///
/// Every key has exactly one writer (its synchronizer), so the lock only
/// guards the map itself.
pub struct ContentHashStore {
    hashes: RwLock<HashMap<&'static str, Option<ContentHash>>>,
}

impl ContentHashStore {
    pub fn new() -> Self {
        Self {
            hashes: RwLock::new(HashMap::new()),
        }
    }

    /// Hashes whatever is on disk at `path`; a missing or unreadable file is
    /// recorded as unknown so the first render always writes.
    pub async fn seed(&self, check: &'static str, path: &Path) -> Option<ContentHash> {
        let hash = match tokio::fs::read(path).await {
            Ok(bytes) => Some(ContentHasher::hash(&bytes)),
            Err(e) => {
                tracing::warn!(
                    check,
                    path = %path.display(),
                    error = %e,
                    "Could not get initial hash"
                );
                None
            }
        };

        tracing::info!(
            check,
            path = %path.display(),
            hash = hash.as_ref().map(|h| h.as_str()).unwrap_or(""),
            "Existing file hash"
        );

        self.hashes.write().await.insert(check, hash.clone());
        hash
    }

    pub async fn current(&self, check: &'static str) -> Option<ContentHash> {
        self.hashes.read().await.get(check).cloned().flatten()
    }

    pub async fn update(&self, check: &'static str, hash: ContentHash) {
        self.hashes.write().await.insert(check, Some(hash));
    }
}

impl Default for ContentHashStore {
    fn default() -> Self {
        Self::new()
    }
}
