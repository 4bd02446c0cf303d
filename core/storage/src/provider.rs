//! Remote backend capability trait.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

use driveport_common::{Error, RemoteFileHandle, Result};

use crate::session::Transport;

/// Byte stream type for downloads.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Factory building a backend on top of an authenticated transport.
pub type BackendFactory =
    Box<dyn Fn(&Transport) -> Result<Arc<dyn RemoteBackend>> + Send + Sync>;

/// Parameters of a listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// Maximum number of entries returned.
    pub page_size: u32,
    /// Only return objects whose name contains this string.
    pub name_contains: Option<String>,
    /// Order by modification time, newest first.
    pub newest_first: bool,
}

impl ListQuery {
    /// Create a query for at most `page_size` entries.
    ///
    /// # Errors
    /// - `page_size` is zero
    pub fn new(page_size: u32) -> Result<Self> {
        if page_size == 0 {
            return Err(Error::InvalidInput(
                "list page size must be positive".to_string(),
            ));
        }
        Ok(Self {
            page_size,
            name_contains: None,
            newest_first: false,
        })
    }

    pub fn name_contains(mut self, fragment: impl Into<String>) -> Self {
        self.name_contains = Some(fragment.into());
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }
}

/// Declared properties of an upload, sent before any content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub name: String,
    pub content_type: String,
    pub size: u64,
}

/// Remote store operations consumed by the transfer gateway.
///
/// Implementations own the wire format; the gateway owns local files,
/// chunking and progress.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Get the backend name (e.g., "gdrive", "memory").
    fn name(&self) -> &str;

    /// List objects, at most `query.page_size` of them.
    async fn list(&self, query: &ListQuery) -> Result<Vec<RemoteFileHandle>>;

    /// Get metadata for an object.
    ///
    /// # Errors
    /// - `NotFound` if the id is unknown
    async fn metadata(&self, id: &str) -> Result<RemoteFileHandle>;

    /// Open the content of an object as a stream.
    async fn download_stream(&self, id: &str) -> Result<ByteStream>;

    /// Start a resumable upload, declaring name, content type and size.
    async fn start_upload(&self, request: &UploadRequest) -> Result<Box<dyn UploadSession>>;
}

/// Provider-side resumable upload in progress.
#[async_trait]
pub trait UploadSession: Send {
    /// Chunk size the provider expects for every chunk but the last.
    fn chunk_size(&self) -> usize;

    /// Send the chunk starting at `offset`.
    ///
    /// Returns the created object once the provider has received every byte,
    /// `None` while more chunks are expected. A zero-byte upload sends a
    /// single empty chunk.
    async fn send_chunk(&mut self, offset: u64, data: Bytes) -> Result<Option<RemoteFileHandle>>;
}
