//! Common types used throughout driveport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Read-only view of an object in the remote store.
///
/// Listing only fills `id` and `name`; metadata lookups and uploads fill the
/// rest when the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileHandle {
    /// Provider-specific object identifier.
    pub id: String,
    /// Object name.
    pub name: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    /// MIME type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Last modification time.
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteFileHandle {
    /// Create a handle carrying only an id and a name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size: None,
            content_type: None,
            modified: None,
        }
    }
}

impl fmt::Display for RemoteFileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Progress of a running transfer, emitted at chunk boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    pub fn new(bytes_transferred: u64, total_bytes: u64) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
        }
    }

    /// Completed fraction in `[0, 1]`. An empty transfer counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        (self.bytes_transferred.min(self.total_bytes) as f64) / (self.total_bytes as f64)
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_transferred >= self.total_bytes
    }
}

/// String secret that zeroizes on drop and never prints its value.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED; {} chars])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_handle_display() {
        let handle = RemoteFileHandle::new("1C71utWp", "notes.txt");
        assert_eq!(handle.to_string(), "notes.txt (1C71utWp)");
        assert_eq!(handle.size, None);
    }

    #[test]
    fn test_empty_transfer_is_complete() {
        let progress = TransferProgress::new(0, 0);
        assert!(progress.is_complete());
        assert_eq!(progress.fraction(), 1.0);
    }

    #[test]
    fn test_secret_debug_redacted() {
        let secret = SecretString::new("ya29.token");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("ya29"));
        assert_eq!(secret.expose(), "ya29.token");
    }

    #[test]
    fn test_secret_serializes_transparently() {
        let secret = SecretString::new("abc");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"abc\"");
    }

    proptest! {
        #[test]
        fn prop_fraction_in_unit_range(done in 0u64..1_000_000, total in 0u64..1_000_000) {
            let fraction = TransferProgress::new(done, total).fraction();
            prop_assert!((0.0..=1.0).contains(&fraction));
        }
    }
}
