//! OAuth2 client configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use driveport_common::{Error, Result};

/// OAuth2 authorization endpoint.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
/// OAuth2 token endpoint.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Redirect URL for installed applications.
const LOCALHOST_REDIRECT: &str = "http://localhost";

/// Access to files created or opened by this application.
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Configuration for OAuth2 authentication.
///
/// Matches the client-secret file downloaded from the provider console,
/// either wrapped in `installed`/`web` or as a flat object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Requested scopes; empty means the default Drive file scope.
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClientSecretFile {
    Installed { installed: ClientConfig },
    Web { web: ClientConfig },
    Flat(ClientConfig),
}

impl ClientConfig {
    /// Create a configuration with default endpoints.
    pub fn new(client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            auth_uri: default_auth_uri(),
            token_uri: default_token_uri(),
            redirect_uris: Vec::new(),
            scopes: Vec::new(),
        }
    }

    /// Parse a client-secret document.
    ///
    /// # Errors
    /// - `Config` if the document is not a client-secret file
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let file: ClientSecretFile = serde_json::from_slice(bytes)
            .map_err(|e| Error::Config(format!("Invalid client configuration: {}", e)))?;

        let config = match file {
            ClientSecretFile::Installed { installed } => installed,
            ClientSecretFile::Web { web } => web,
            ClientSecretFile::Flat(config) => config,
        };

        if config.client_id.is_empty() {
            return Err(Error::Config("client_id is empty".to_string()));
        }
        Ok(config)
    }

    /// Read and parse the client-secret file at `path`.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            Error::Config(format!(
                "Unable to read client secret file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&bytes)
    }

    /// Redirect URL registered for the client.
    pub fn redirect_url(&self) -> &str {
        self.redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(LOCALHOST_REDIRECT)
    }

    /// Scopes requested during consent.
    pub fn requested_scopes(&self) -> Vec<String> {
        if self.scopes.is_empty() {
            vec![DRIVE_FILE_SCOPE.to_string()]
        } else {
            self.scopes.clone()
        }
    }
}
