use crate::types::ContentHash;

/// The only digest used for config documents, both for what is on disk and
/// for what was just rendered.
pub struct ContentHasher;

impl ContentHasher {
    pub fn hash(content: &[u8]) -> ContentHash {
        ContentHash::from_hex(blake3::hash(content).to_hex().to_string())
    }

    pub fn is_changed(old_hash: Option<&ContentHash>, new_hash: &ContentHash) -> bool {
        match old_hash {
            Some(old) => old != new_hash,
            None => true,
        }
    }
}
