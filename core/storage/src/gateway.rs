//! Transfer orchestration between local files and a remote backend.

use bytes::Bytes;
use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use driveport_common::{Error, RemoteFileHandle, Result, TransferProgress};

use crate::content_type::ContentSniffer;
use crate::provider::{ListQuery, RemoteBackend, UploadRequest};

const COMPONENT: &str = "TransferGateway";

/// Bytes of the file name kept in a download's temporary name.
const TEMP_PREFIX_MAX: usize = 200;

/// Receives progress updates at chunk boundaries.
pub trait ProgressSink: Send {
    fn report(&mut self, progress: TransferProgress);
}

impl<F> ProgressSink for F
where
    F: FnMut(TransferProgress) + Send,
{
    fn report(&mut self, progress: TransferProgress) {
        self(progress)
    }
}

/// Sink that ignores every update.
pub fn no_progress() -> impl ProgressSink {
    |_: TransferProgress| {}
}

/// Result of a completed download.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub handle: RemoteFileHandle,
    /// Final location of the local copy.
    pub path: PathBuf,
    pub bytes: u64,
}

/// Lists, inspects, uploads and downloads remote objects.
///
/// Holds no state of its own; every call owns its local file and remote
/// request, so calls may run concurrently.
#[derive(Clone)]
pub struct TransferGateway {
    backend: Arc<dyn RemoteBackend>,
    sniffer: Arc<dyn ContentSniffer>,
}

impl TransferGateway {
    pub fn new(backend: Arc<dyn RemoteBackend>, sniffer: Arc<dyn ContentSniffer>) -> Self {
        Self { backend, sniffer }
    }

    pub fn backend(&self) -> &dyn RemoteBackend {
        self.backend.as_ref()
    }

    /// List remote objects; never more than `query.page_size` entries.
    pub async fn list(&self, query: &ListQuery) -> Result<Vec<RemoteFileHandle>> {
        let mut files = self.backend.list(query).await?;
        files.truncate(query.page_size as usize);
        Ok(files)
    }

    /// Get metadata for a remote object.
    pub async fn metadata(&self, id: &str) -> Result<RemoteFileHandle> {
        self.backend.metadata(id).await
    }

    /// First remote object whose name contains `name`.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<RemoteFileHandle>> {
        let query = ListQuery::new(1)?.name_contains(name);
        Ok(self.list(&query).await?.into_iter().next())
    }

    /// Most recently modified remote object.
    pub async fn latest(&self) -> Result<Option<RemoteFileHandle>> {
        let query = ListQuery::new(1)?.newest_first();
        Ok(self.list(&query).await?.into_iter().next())
    }

    /// Download an object into `dest_dir`, named after the remote object.
    ///
    /// Content is streamed into a temporary `.part` file next to the
    /// destination and renamed into place only once complete; on any
    /// failure, or if the returned future is dropped, the temporary file is
    /// removed. An existing file of the same name is replaced.
    ///
    /// # Errors
    /// - `NotFound` if `id` is unknown (no local file is created)
    /// - `Remote` on transport failure or a short download
    /// - `LocalWrite` if the destination cannot be written
    pub async fn download(
        &self,
        id: &str,
        dest_dir: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<DownloadedFile> {
        let handle = self.backend.metadata(id).await?;
        self.download_handle(handle, dest_dir, progress).await
    }

    /// Download an object whose metadata was already fetched.
    ///
    /// `handle.size`, when present, is checked against the received bytes.
    pub async fn download_handle(
        &self,
        handle: RemoteFileHandle,
        dest_dir: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<DownloadedFile> {
        let id = handle.id.as_str();
        let file_name = local_file_name(&handle.name).ok_or_else(|| Error::LocalWrite {
            path: dest_dir.join(&handle.name),
            source: std::io::Error::new(
                ErrorKind::InvalidInput,
                "remote name is not a usable file name",
            ),
        })?;
        let destination = dest_dir.join(file_name);
        let write_error = |source: std::io::Error| Error::LocalWrite {
            path: destination.clone(),
            source,
        };

        tracing::debug!(component = COMPONENT, id, path = %destination.display(), "Starting download");

        let mut stream = self.backend.download_stream(id).await?;

        let prefix = temp_prefix(file_name);
        let temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".part")
            .tempfile_in(dest_dir)
            .map_err(write_error)?;
        let (file, temp_path) = temp.into_parts();
        let mut file = File::from_std(file);

        let total = handle.size.unwrap_or(0);
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(write_error)?;
            written += chunk.len() as u64;
            progress.report(TransferProgress::new(written, total.max(written)));
        }
        file.flush().await.map_err(write_error)?;
        file.sync_all().await.map_err(write_error)?;
        drop(file);

        if let Some(expected) = handle.size {
            if written != expected {
                return Err(Error::Remote(format!(
                    "download of {} ended after {} of {} bytes",
                    id, written, expected
                )));
            }
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o644))
                .await
                .map_err(write_error)?;
        }

        temp_path
            .persist(&destination)
            .map_err(|e| write_error(e.error))?;

        tracing::debug!(component = COMPONENT, id, bytes = written, "Download complete");
        Ok(DownloadedFile {
            handle,
            path: destination,
            bytes: written,
        })
    }

    /// Upload a local file through a resumable session.
    ///
    /// The remote object is named after the final component of `local_path`.
    /// Progress is reported after every chunk; a failed chunk is not retried.
    ///
    /// # Errors
    /// - `ContentType` if no MIME type can be determined
    /// - `LocalRead` if the file cannot be opened or read
    /// - `Remote` on transport or provider failure
    pub async fn upload(
        &self,
        local_path: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<RemoteFileHandle> {
        let read_error = |source: std::io::Error| Error::LocalRead {
            path: local_path.to_path_buf(),
            source,
        };

        let content_type = self.sniffer.determine(local_path).await?;

        let mut file = File::open(local_path).await.map_err(read_error)?;
        let metadata = file.metadata().await.map_err(read_error)?;
        if !metadata.is_file() {
            return Err(read_error(std::io::Error::new(
                ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        let size = metadata.len();

        let name = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::InvalidInput(format!("{} has no usable file name", local_path.display()))
            })?
            .to_string();

        tracing::debug!(component = COMPONENT, name = %name, content_type = %content_type, size, "Starting upload");

        let request = UploadRequest {
            name,
            content_type,
            size,
        };
        let mut session = self.backend.start_upload(&request).await?;
        let chunk_size = session.chunk_size().max(1);
        let mut buffer = vec![0u8; chunk_size.min(usize::try_from(size).unwrap_or(chunk_size))];

        let mut offset = 0u64;
        loop {
            let want = usize::try_from(size - offset).map_or(chunk_size, |left| left.min(chunk_size));
            let read = read_full(&mut file, &mut buffer[..want]).await.map_err(read_error)?;
            if read < want {
                return Err(read_error(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "file shrank during upload",
                )));
            }

            let result = session
                .send_chunk(offset, Bytes::copy_from_slice(&buffer[..read]))
                .await?;
            offset += read as u64;
            progress.report(TransferProgress::new(offset, size));

            if let Some(mut handle) = result {
                handle.size.get_or_insert(offset);
                tracing::debug!(component = COMPONENT, id = %handle.id, size = offset, "Upload complete");
                return Ok(handle);
            }
            if offset >= size {
                return Err(Error::Remote(format!(
                    "upload of {} was not confirmed after {} bytes",
                    request.name, offset
                )));
            }
        }
    }
}

/// Final path component of a remote name, if it is a usable file name.
fn local_file_name(name: &str) -> Option<&str> {
    Path::new(name).file_name().and_then(|name| name.to_str())
}

/// Hidden temporary-file prefix for `file_name`.
///
/// The name is cut to `TEMP_PREFIX_MAX` bytes so the random part and the
/// `.part` suffix still fit in a 255-byte file name.
fn temp_prefix(file_name: &str) -> String {
    let mut end = file_name.len().min(TEMP_PREFIX_MAX);
    while !file_name.is_char_boundary(end) {
        end -= 1;
    }
    format!(".{}.", &file_name[..end])
}

/// Fill `buf` unless the reader hits end of file first.
async fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = file.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}
