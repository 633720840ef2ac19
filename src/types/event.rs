use std::fmt;

/// Hex digest of a rendered config document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Emitted by a synchronizer after it replaced its config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub check: &'static str,
    pub previous: Option<ContentHash>,
    pub current: ContentHash,
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let previous = self.previous.as_ref().map(|h| h.as_str()).unwrap_or("unknown");
        write!(f, "{} ({} -> {})", self.check, previous, self.current)
    }
}
