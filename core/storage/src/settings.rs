//! User settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use driveport_common::{Error, Result};

/// Directory name under the platform configuration directory.
const APP_DIR: &str = "driveport";

/// Settings read from `<config_dir>/driveport/config.json`.
///
/// Every field is optional in the file; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// OAuth client configuration downloaded from the provider console.
    pub client_config_path: PathBuf,
    /// Cached credential file.
    pub token_path: PathBuf,
    /// Directory downloads are written to.
    pub download_dir: PathBuf,
    /// Entries shown by `list`.
    pub page_size: u32,
    /// Open the consent URL in a browser.
    pub open_browser: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client_config_path: PathBuf::from("credentials.json"),
            token_path: app_config_dir()
                .map(|dir| dir.join("token.json"))
                .unwrap_or_else(|| PathBuf::from("token.json")),
            download_dir: PathBuf::from("."),
            page_size: 10,
            open_browser: false,
        }
    }
}

impl Settings {
    /// Default location of the settings file.
    pub fn default_path() -> Option<PathBuf> {
        app_config_dir().map(|dir| dir.join("config.json"))
    }

    /// Load settings.
    ///
    /// With an explicit `path` the file must exist; otherwise the default
    /// location is tried and a missing file yields defaults.
    ///
    /// # Errors
    /// - `Config` if the file cannot be read or parsed
    /// - `InvalidInput` if a value is out of range
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path, true).await,
            None => match Self::default_path() {
                Some(path) => Self::load_from(&path, false).await,
                None => Ok(Self::default()),
            },
        }
    }

    /// Read `path`; when not `required`, a missing file yields the defaults.
    async fn load_from(path: &Path, required: bool) -> Result<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::debug!(component = "Settings", path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "Cannot read settings {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let settings: Settings = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Config(format!("Invalid settings {}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::InvalidInput("page_size must be positive".to_string()));
        }
        Ok(())
    }
}

fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Records the field names of every event.
    #[derive(Clone, Default)]
    struct EventFields(Arc<Mutex<Vec<Vec<&'static str>>>>);

    impl<S: tracing::Subscriber> Layer<S> for EventFields {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let names = event.metadata().fields().iter().map(|f| f.name()).collect();
            self.0.lock().unwrap().push(names);
        }
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.client_config_path, PathBuf::from("credentials.json"));
        assert_eq!(settings.download_dir, PathBuf::from("."));
        assert_eq!(settings.page_size, 10);
        assert!(!settings.open_browser);
        assert!(settings.token_path.ends_with("token.json"));
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"page_size": 25, "download_dir": "/tmp/drive"}"#).unwrap();

        let settings = Settings::load(Some(&path)).await.unwrap();
        assert_eq!(settings.page_size, 25);
        assert_eq!(settings.download_dir, PathBuf::from("/tmp/drive"));
        assert_eq!(settings.client_config_path, PathBuf::from("credentials.json"));
    }

    #[tokio::test]
    async fn test_missing_default_file_logs_component() {
        let dir = TempDir::new().unwrap();
        let events = EventFields::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));

        let settings = Settings::load_from(&dir.path().join("config.json"), false)
            .await
            .unwrap();

        assert_eq!(settings, Settings::default());
        let recorded = events.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].contains(&"component"));
    }

    #[tokio::test]
    async fn test_explicit_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let result = Settings::load(Some(&dir.path().join("absent.json"))).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        std::fs::write(&path, "page_size = 3").unwrap();
        assert!(matches!(
            Settings::load(Some(&path)).await,
            Err(Error::Config(_))
        ));

        std::fs::write(&path, r#"{"page_size": 0}"#).unwrap();
        assert!(matches!(
            Settings::load(Some(&path)).await,
            Err(Error::InvalidInput(_))
        ));
    }
}
