//! Local persistence of the authorization grant.

use std::io::Write;
use std::path::{Path, PathBuf};

use driveport_common::{Error, Result};

use super::authorization::Authorization;

/// Persists and retrieves the reusable authorization.
///
/// The file is replaced atomically (temporary file in the same directory,
/// then rename) and is readable and writable by the owner only.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored authorization.
    ///
    /// # Postconditions
    /// - `Ok(None)` if no credential file exists
    ///
    /// # Errors
    /// - `Corrupt` if the file exists but cannot be parsed
    /// - `LocalRead` if the file exists but cannot be read
    pub async fn load(&self) -> Result<Option<Authorization>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::LocalRead {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        self.decode(&bytes).map(Some)
    }

    /// Atomically replace the stored authorization.
    ///
    /// # Errors
    /// - `CredentialWrite` if the file cannot be written
    pub async fn save(&self, authorization: &Authorization) -> Result<()> {
        let bytes = self.encode(authorization)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| self.write_error(format!("writer task failed: {}", e)))?
            .map_err(|e| self.write_error(e.to_string()))?;

        tracing::debug!(component = "CredentialStore", path = %self.path.display(), "Saved credentials");
        Ok(())
    }

    /// Remove the stored authorization; a missing file is not an error.
    ///
    /// # Errors
    /// - `CredentialWrite` if the file exists but cannot be removed
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!(component = "CredentialStore", path = %self.path.display(), "Removed credentials");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.write_error(e.to_string())),
        }
    }

    fn encode(&self, authorization: &Authorization) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(authorization)
            .map_err(|e| self.write_error(format!("serialization failed: {}", e)))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Authorization> {
        serde_json::from_slice(bytes).map_err(|e| Error::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn write_error(&self, reason: String) -> Error {
        Error::CredentialWrite {
            path: self.path.clone(),
            reason,
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    // Temporary files are created with mode 0600 on unix.
    let mut temp = tempfile::Builder::new()
        .prefix(".credentials")
        .suffix(".tmp")
        .tempfile_in(&dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
