//! In-memory remote backend for testing.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use driveport_common::{Error, RemoteFileHandle, Result};

use crate::provider::{ByteStream, ListQuery, RemoteBackend, UploadRequest, UploadSession};

/// Default chunk size for uploads and download stream items.
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    handle: RemoteFileHandle,
    data: Vec<u8>,
    seq: u64,
}

type Objects = Arc<RwLock<HashMap<String, StoredObject>>>;

/// In-memory remote backend.
///
/// Clones share the same store, so a test can keep one handle for
/// inspection while the repository owns another.
#[derive(Clone)]
pub struct MemoryBackend {
    objects: Objects,
    seq: Arc<AtomicU64>,
    metadata_calls: Arc<AtomicUsize>,
    chunk_size: usize,
    /// Download streams fail after this many bytes.
    fail_download_after: Option<usize>,
}

impl MemoryBackend {
    /// Create a new empty memory backend.
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            seq: Arc::new(AtomicU64::new(0)),
            metadata_calls: Arc::new(AtomicUsize::new(0)),
            chunk_size: DEFAULT_CHUNK_SIZE,
            fail_download_after: None,
        }
    }

    /// Use `chunk_size` for upload sessions and download stream items.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Make every download stream fail once `bytes` bytes were delivered.
    pub fn with_download_failure(mut self, bytes: usize) -> Self {
        self.fail_download_after = Some(bytes);
        self
    }

    /// Store an object directly, bypassing the upload protocol.
    pub fn insert(
        &self,
        name: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> RemoteFileHandle {
        commit(&self.objects, &self.seq, name.into(), content_type.into(), data)
    }

    /// Content of a stored object.
    pub fn contents(&self, id: &str) -> Option<Vec<u8>> {
        read(&self.objects).get(id).map(|object| object.data.clone())
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        read(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `metadata` requests served.
    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn read(objects: &Objects) -> RwLockReadGuard<'_, HashMap<String, StoredObject>> {
    objects.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(objects: &Objects) -> RwLockWriteGuard<'_, HashMap<String, StoredObject>> {
    objects.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn commit(
    objects: &Objects,
    seq: &AtomicU64,
    name: String,
    content_type: String,
    data: Vec<u8>,
) -> RemoteFileHandle {
    let handle = RemoteFileHandle {
        id: Uuid::new_v4().to_string(),
        name,
        size: Some(data.len() as u64),
        content_type: Some(content_type),
        modified: Some(Utc::now()),
    };
    let object = StoredObject {
        handle: handle.clone(),
        data,
        seq: seq.fetch_add(1, Ordering::SeqCst),
    };
    write(objects).insert(handle.id.clone(), object);
    handle
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<RemoteFileHandle>> {
        let objects = read(&self.objects);
        let mut matching: Vec<&StoredObject> = objects
            .values()
            .filter(|object| match &query.name_contains {
                Some(fragment) => object.handle.name.contains(fragment.as_str()),
                None => true,
            })
            .collect();

        // Insertion order doubles as modification order.
        matching.sort_by_key(|object| object.seq);
        if query.newest_first {
            matching.reverse();
        }

        Ok(matching
            .into_iter()
            .take(query.page_size as usize)
            .map(|object| RemoteFileHandle::new(&object.handle.id, &object.handle.name))
            .collect())
    }

    async fn metadata(&self, id: &str) -> Result<RemoteFileHandle> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        read(&self.objects)
            .get(id)
            .map(|object| object.handle.clone())
            .ok_or_else(|| Error::NotFound(format!("file {}", id)))
    }

    async fn download_stream(&self, id: &str) -> Result<ByteStream> {
        let data = read(&self.objects)
            .get(id)
            .map(|object| object.data.clone())
            .ok_or_else(|| Error::NotFound(format!("file {}", id)))?;

        let limit = self.fail_download_after.unwrap_or(data.len()).min(data.len());
        let mut items: Vec<Result<Bytes>> = data[..limit]
            .chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if self.fail_download_after.is_some() {
            items.push(Err(Error::Remote(format!(
                "connection reset while downloading {}",
                id
            ))));
        }

        Ok(Box::pin(stream::iter(items)))
    }

    async fn start_upload(&self, request: &UploadRequest) -> Result<Box<dyn UploadSession>> {
        Ok(Box::new(MemoryUpload {
            objects: self.objects.clone(),
            seq: self.seq.clone(),
            request: request.clone(),
            buffer: Vec::new(),
            chunk_size: self.chunk_size,
        }))
    }
}

struct MemoryUpload {
    objects: Objects,
    seq: Arc<AtomicU64>,
    request: UploadRequest,
    buffer: Vec<u8>,
    chunk_size: usize,
}

#[async_trait]
impl UploadSession for MemoryUpload {
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    async fn send_chunk(&mut self, offset: u64, data: Bytes) -> Result<Option<RemoteFileHandle>> {
        if offset != self.buffer.len() as u64 {
            return Err(Error::Remote(format!(
                "upload of {} expected offset {}, got {}",
                self.request.name,
                self.buffer.len(),
                offset
            )));
        }

        self.buffer.extend_from_slice(&data);
        let received = self.buffer.len() as u64;

        if received > self.request.size {
            return Err(Error::Remote(format!(
                "upload of {} received {} bytes, declared {}",
                self.request.name, received, self.request.size
            )));
        }
        if received < self.request.size {
            return Ok(None);
        }

        Ok(Some(commit(
            &self.objects,
            &self.seq,
            self.request.name.clone(),
            self.request.content_type.clone(),
            std::mem::take(&mut self.buffer),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn request(name: &str, size: u64) -> UploadRequest {
        UploadRequest {
            name: name.to_string(),
            content_type: "text/plain".to_string(),
            size,
        }
    }

    #[tokio::test]
    async fn test_memory_upload_in_chunks() {
        let backend = MemoryBackend::new().with_chunk_size(4);
        let mut session = backend.start_upload(&request("a.txt", 6)).await.unwrap();

        assert!(session
            .send_chunk(0, Bytes::from_static(b"abcd"))
            .await
            .unwrap()
            .is_none());
        let handle = session
            .send_chunk(4, Bytes::from_static(b"ef"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(handle.size, Some(6));
        assert_eq!(backend.contents(&handle.id).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_memory_upload_rejects_wrong_offset() {
        let backend = MemoryBackend::new();
        let mut session = backend.start_upload(&request("a.txt", 6)).await.unwrap();

        let result = session.send_chunk(3, Bytes::from_static(b"abc")).await;
        assert!(matches!(result, Err(Error::Remote(_))));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_memory_list_filters_and_orders() {
        let backend = MemoryBackend::new();
        backend.insert("report-1.pdf", "application/pdf", vec![1]);
        backend.insert("photo.jpg", "image/jpeg", vec![2]);
        backend.insert("report-2.pdf", "application/pdf", vec![3]);

        let query = ListQuery::new(10).unwrap().name_contains("report").newest_first();
        let names: Vec<String> = backend
            .list(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|handle| handle.name)
            .collect();

        assert_eq!(names, vec!["report-2.pdf", "report-1.pdf"]);
    }

    #[tokio::test]
    async fn test_memory_download_failure_injection() {
        let backend = MemoryBackend::new().with_chunk_size(2).with_download_failure(3);
        let handle = backend.insert("data.bin", "application/octet-stream", vec![0; 8]);

        let items: Vec<Result<Bytes>> = backend
            .download_stream(&handle.id)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 3);
        assert!(matches!(items.last(), Some(Err(Error::Remote(_)))));
    }

    #[tokio::test]
    async fn test_memory_metadata_not_found() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.metadata("missing").await,
            Err(Error::NotFound(_))
        ));
    }
}
