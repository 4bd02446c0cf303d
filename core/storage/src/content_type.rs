//! Content-type detection for uploads.
//!
//! The system `file` tool is asked first; when it is missing, fails, or has
//! no opinion, the file extension decides. The extension path is a degraded
//! result and is logged as such.

use async_trait::async_trait;
use std::path::Path;

use driveport_common::{Error, Result};

const COMPONENT: &str = "ContentSniffer";

/// Determines the MIME type of a local file.
#[async_trait]
pub trait ContentSniffer: Send + Sync {
    /// # Errors
    /// - `ContentType` if no MIME type can be determined
    async fn determine(&self, path: &Path) -> Result<String>;
}

/// Extension-based lookup only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionSniffer;

#[async_trait]
impl ContentSniffer for ExtensionSniffer {
    async fn determine(&self, path: &Path) -> Result<String> {
        guess_from_extension(path).ok_or_else(|| Error::ContentType(path.to_path_buf()))
    }
}

/// Runs `file --brief --mime-type`, falling back to the extension.
#[derive(Debug, Clone)]
pub struct SystemSniffer {
    program: String,
}

impl SystemSniffer {
    pub fn new() -> Self {
        Self::with_program("file")
    }

    /// Use a different `file`-compatible program.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn sniff(&self, path: &Path) -> std::io::Result<Option<String>> {
        let output = tokio::process::Command::new(&self.program)
            .arg("--brief")
            .arg("--mime-type")
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        Ok(parse_mime_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl Default for SystemSniffer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentSniffer for SystemSniffer {
    async fn determine(&self, path: &Path) -> Result<String> {
        match self.sniff(path).await {
            Ok(Some(mime)) => {
                tracing::debug!(component = COMPONENT, path = %path.display(), mime = %mime, "Sniffed content type");
                return Ok(mime);
            }
            Ok(None) => {
                tracing::debug!(component = COMPONENT, path = %path.display(), "Sniffer gave no usable answer");
            }
            Err(e) => {
                tracing::warn!(component = COMPONENT, "Could not run {}: {}", self.program, e);
            }
        }

        let mime = guess_from_extension(path).ok_or_else(|| Error::ContentType(path.to_path_buf()))?;
        tracing::warn!(
            component = COMPONENT,
            path = %path.display(),
            mime = %mime,
            "Using extension-based content type"
        );
        Ok(mime)
    }
}

fn guess_from_extension(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first().map(|mime| mime.essence_str().to_string())
}

/// Extract `type/subtype` from sniffer output.
///
/// Accepts both `--brief` output and the `name: type; charset=...` form.
/// Answers describing the inode rather than the content are discarded.
fn parse_mime_output(output: &str) -> Option<String> {
    let line = output.lines().next()?;
    let value = match line.rsplit_once(": ") {
        Some((_, value)) => value,
        None => line,
    };
    let mime = value.split(';').next()?.trim();

    let (kind, subtype) = mime.split_once('/')?;
    if kind.is_empty() || subtype.is_empty() || mime.contains(char::is_whitespace) {
        return None;
    }
    if kind == "inode" || mime == "application/x-empty" {
        return None;
    }
    Some(mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_brief_output() {
        assert_eq!(parse_mime_output("text/plain\n").as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_parse_long_output() {
        assert_eq!(
            parse_mime_output("notes.txt: text/plain; charset=us-ascii\n").as_deref(),
            Some("text/plain")
        );
    }

    #[test]
    fn test_parse_discards_inode_answers() {
        assert_eq!(parse_mime_output("inode/x-empty\n"), None);
        assert_eq!(parse_mime_output("inode/directory\n"), None);
        assert_eq!(parse_mime_output("application/x-empty\n"), None);
        assert_eq!(parse_mime_output(""), None);
        assert_eq!(parse_mime_output("cannot open `x' (No such file)"), None);
    }

    #[tokio::test]
    async fn test_extension_sniffer() {
        let mime = ExtensionSniffer.determine(Path::new("report.pdf")).await.unwrap();
        assert_eq!(mime, "application/pdf");

        let result = ExtensionSniffer.determine(Path::new("README")).await;
        assert!(matches!(result, Err(Error::ContentType(_))));
    }

    #[tokio::test]
    async fn test_missing_tool_falls_back_to_extension() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("page.html");
        std::fs::write(&path, b"<html></html>").unwrap();

        let sniffer = SystemSniffer::with_program("driveport-no-such-sniffer");
        assert_eq!(sniffer.determine(&path).await.unwrap(), "text/html");
    }

    #[tokio::test]
    async fn test_missing_tool_and_unknown_extension() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("blob");
        std::fs::write(&path, b"\x00\x01").unwrap();

        let sniffer = SystemSniffer::with_program("driveport-no-such-sniffer");
        assert!(matches!(
            sniffer.determine(&path).await,
            Err(Error::ContentType(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_file_uses_extension() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.txt");
        std::fs::write(&path, b"").unwrap();

        // Whether or not `file` is installed, an empty file resolves by extension
        let mime = SystemSniffer::new().determine(&path).await.unwrap();
        assert_eq!(mime, "text/plain");
    }
}
