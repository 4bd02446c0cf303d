//! Google Drive API client.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{header, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use driveport_common::{Error, RemoteFileHandle, Result};

use crate::provider::{ByteStream, ListQuery, RemoteBackend, UploadRequest, UploadSession};
use crate::session::Transport;

/// Google Drive API base URL.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Google Drive upload API base URL.
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Chunk size for resumable uploads (must be a multiple of 256KB).
const CHUNK_SIZE: usize = 8 * 256 * 1024; // 2MB

/// Metadata fields requested for single files.
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime";

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File ID.
    pub id: String,
    /// File name.
    pub name: String,
    /// MIME type.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// File size in bytes (only for files, not folders).
    #[serde(default)]
    pub size: Option<String>,
    /// Modified time.
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
}

impl DriveFile {
    /// Get size as u64.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }
}

impl From<DriveFile> for RemoteFileHandle {
    fn from(file: DriveFile) -> Self {
        let size = file.size_bytes();
        RemoteFileHandle {
            id: file.id,
            name: file.name,
            size,
            content_type: file.mime_type,
            modified: file.modified_time,
        }
    }
}

/// Response from listing files.
#[derive(Debug, Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Google Drive backend.
pub struct DriveBackend {
    transport: Transport,
}

impl DriveBackend {
    /// Create a Drive backend signing requests through `transport`.
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }
}

/// Build a `DriveBackend` for an authenticated session.
pub fn create_drive_backend(transport: &Transport) -> Result<Arc<dyn RemoteBackend>> {
    Ok(Arc::new(DriveBackend::new(transport.clone())))
}

#[async_trait]
impl RemoteBackend for DriveBackend {
    fn name(&self) -> &str {
        "gdrive"
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<RemoteFileHandle>> {
        let url = format!("{}/files", DRIVE_API_BASE);
        let page_size = query.page_size.to_string();
        let q = search_expression(query);

        let mut request = self.transport.get(&url).query(&[
            ("q", q.as_str()),
            ("fields", "files(id,name)"),
            ("pageSize", page_size.as_str()),
        ]);
        if query.newest_first {
            request = request.query(&[("orderBy", "modifiedTime desc")]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Remote(format!("Failed to list files: {}", e)))?;

        let list: FileListResponse = parse_json(check(response, "list files").await?).await?;
        Ok(list
            .files
            .into_iter()
            .map(|file| RemoteFileHandle::new(file.id, file.name))
            .collect())
    }

    async fn metadata(&self, id: &str) -> Result<RemoteFileHandle> {
        let url = file_url(id)?;

        let response = self
            .transport
            .get(url.as_str())
            .query(&[("fields", FILE_FIELDS)])
            .send()
            .await
            .map_err(|e| Error::Remote(format!("Failed to get file {}: {}", id, e)))?;

        let file: DriveFile = parse_json(check(response, &format!("file {}", id)).await?).await?;
        Ok(file.into())
    }

    async fn download_stream(&self, id: &str) -> Result<ByteStream> {
        let url = file_url(id)?;

        let response = self
            .transport
            .get(url.as_str())
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| Error::Remote(format!("Failed to start download of {}: {}", id, e)))?;
        let response = check(response, &format!("file {}", id)).await?;

        let id = id.to_string();
        let stream = response.bytes_stream().map(move |result| {
            result.map_err(|e| Error::Remote(format!("Stream read error for {}: {}", id, e)))
        });

        Ok(Box::pin(stream))
    }

    async fn start_upload(&self, request: &UploadRequest) -> Result<Box<dyn UploadSession>> {
        let url = format!("{}/files", DRIVE_UPLOAD_BASE);

        let metadata = serde_json::json!({
            "name": request.name,
            "mimeType": request.content_type,
        });

        let response = self
            .transport
            .post(&url)
            .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
            .header("X-Upload-Content-Type", request.content_type.as_str())
            .header("X-Upload-Content-Length", request.size.to_string())
            .json(&metadata)
            .send()
            .await
            .map_err(|e| {
                Error::Remote(format!("Failed to start upload of {}: {}", request.name, e))
            })?;
        let response = check(response, &format!("upload of {}", request.name)).await?;

        // Extract upload URI from Location header
        let upload_uri = response
            .headers()
            .get(header::LOCATION)
            .ok_or_else(|| Error::Remote(format!("No upload URI for {}", request.name)))?
            .to_str()
            .map_err(|e| Error::Remote(format!("Invalid upload URI: {}", e)))?
            .to_string();

        tracing::debug!(component = "DriveBackend", name = %request.name, "Resumable upload session started");

        Ok(Box::new(DriveUploadSession {
            transport: self.transport.clone(),
            upload_uri,
            name: request.name.clone(),
            total_size: request.size,
        }))
    }
}

/// One resumable upload; the server tracks the received offset.
struct DriveUploadSession {
    transport: Transport,
    upload_uri: String,
    name: String,
    total_size: u64,
}

#[async_trait]
impl UploadSession for DriveUploadSession {
    fn chunk_size(&self) -> usize {
        CHUNK_SIZE
    }

    async fn send_chunk(&mut self, offset: u64, data: Bytes) -> Result<Option<RemoteFileHandle>> {
        let range = content_range(offset, data.len() as u64, self.total_size).ok_or_else(|| {
            Error::Remote(format!(
                "upload of {}: empty chunk at offset {} of {}",
                self.name, offset, self.total_size
            ))
        })?;
        let chunk_end = offset + data.len() as u64;

        let response = self
            .transport
            .put(&self.upload_uri)
            .header(header::CONTENT_RANGE, range)
            .body(data)
            .send()
            .await
            .map_err(|e| Error::Remote(format!("Failed to upload chunk of {}: {}", self.name, e)))?;

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            let file: DriveFile = parse_json(response).await?;
            return Ok(Some(file.into()));
        }
        if status == StatusCode::PERMANENT_REDIRECT {
            // 308 Resume Incomplete
            let acknowledged = response
                .headers()
                .get(header::RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(acknowledged_bytes)
                .unwrap_or(0);
            if acknowledged != chunk_end {
                return Err(Error::Remote(format!(
                    "upload of {}: server acknowledged {} of {} bytes",
                    self.name, acknowledged, chunk_end
                )));
            }
            return Ok(None);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::Remote(format!(
            "Chunk upload of {} failed: {} - {}",
            self.name, status, body
        )))
    }
}

/// URL of a single file, with `id` escaped as one path segment.
///
/// Ids that cannot name a segment (`.`, `..`, empty) match no file.
fn file_url(id: &str) -> Result<Url> {
    if matches!(id, "" | "." | "..") {
        return Err(Error::NotFound(format!("file {}", id)));
    }
    let mut url = Url::parse(DRIVE_API_BASE)
        .map_err(|e| Error::Remote(format!("Invalid API base URL: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| Error::Remote("API base URL cannot have path segments".to_string()))?
        .push("files")
        .push(id);
    Ok(url)
}

/// Drive search expression for a listing request.
fn search_expression(query: &ListQuery) -> String {
    let mut q = String::from("trashed = false");
    if let Some(fragment) = &query.name_contains {
        let escaped = fragment.replace('\\', "\\\\").replace('\'', "\\'");
        q.push_str(&format!(" and name contains '{}'", escaped));
    }
    q
}

/// `Content-Range` value for a chunk, `None` for an empty chunk of a
/// non-empty upload.
fn content_range(offset: u64, len: u64, total: u64) -> Option<String> {
    if total == 0 {
        return Some("bytes */0".to_string());
    }
    if len == 0 {
        return None;
    }
    Some(format!("bytes {}-{}/{}", offset, offset + len - 1, total))
}

/// Byte count acknowledged by a `Range: bytes=0-N` header.
fn acknowledged_bytes(range: &str) -> Option<u64> {
    let (_, end) = range.strip_prefix("bytes=")?.split_once('-')?;
    end.trim().parse::<u64>().ok().map(|end| end + 1)
}

/// Map non-success statuses onto the error taxonomy.
async fn check(response: Response, target: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(Error::NotFound(target.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Remote(format!("API error for {}: {} - {}", target, status, body)))
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| Error::Remote(format!("Failed to parse response: {}", e)))
}
