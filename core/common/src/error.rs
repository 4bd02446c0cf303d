//! Common error types for driveport.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for driveport operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No usable credential could be obtained.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The authorization code could not be exchanged for tokens.
    #[error("Authorization exchange failed: {0}")]
    Exchange(String),

    /// The interactive consent flow was abandoned.
    #[error("Authorization aborted by user")]
    UserAborted,

    /// Transport or provider failure.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Remote object not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A local file could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    LocalRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A local file could not be written.
    #[error("Failed to write {}: {source}", .path.display())]
    LocalWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The credential file could not be written.
    #[error("Failed to save credentials to {}: {reason}", .path.display())]
    CredentialWrite { path: PathBuf, reason: String },

    /// Content type could not be determined.
    #[error("Cannot determine content type of {}", .0.display())]
    ContentType(PathBuf),

    /// The credential file exists but cannot be parsed.
    #[error("Corrupt credential file {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// A downloaded archive cannot be unpacked.
    #[error("Cannot extract {}: {reason}", .path.display())]
    Archive { path: PathBuf, reason: String },

    /// Client configuration or settings are missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether the error leaves the invocation without any usable credential.
    ///
    /// Callers must stop the run on a fatal error instead of continuing
    /// unauthenticated.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::Exchange(_) | Error::UserAborted)
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Auth("no credential".to_string()).is_fatal());
        assert!(Error::Exchange("bad code".to_string()).is_fatal());
        assert!(Error::UserAborted.is_fatal());
        assert!(!Error::Remote("timeout".to_string()).is_fatal());
        assert!(!Error::NotFound("file abc".to_string()).is_fatal());
    }

    #[test]
    fn test_messages_name_the_target() {
        let err = Error::LocalRead {
            path: PathBuf::from("/tmp/report.pdf"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(err.to_string(), "Failed to read /tmp/report.pdf: missing");

        let err = Error::ContentType(PathBuf::from("blob"));
        assert_eq!(err.to_string(), "Cannot determine content type of blob");

        let err = Error::Archive {
            path: PathBuf::from("photos.zip"),
            reason: "invalid Zip archive".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot extract photos.zip: invalid Zip archive");
    }
}
