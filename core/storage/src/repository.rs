//! File repository facade.
//!
//! The single entry point used by the command line: every operation first
//! makes sure a session is established for this process, then delegates to
//! the transfer gateway.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;

use driveport_common::{Error, RemoteFileHandle, Result};

use crate::auth::{CredentialStore, InteractiveAuthorizer};
use crate::content_type::{ContentSniffer, SystemSniffer};
use crate::gateway::{DownloadedFile, ProgressSink, TransferGateway};
use crate::gdrive::create_drive_backend;
use crate::provider::{BackendFactory, ListQuery};
use crate::session::AuthenticatedSession;

const COMPONENT: &str = "FileRepository";

/// Which remote file to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadTarget {
    /// Exact file id.
    Id(String),
    /// First file whose name contains this string.
    Name(String),
    /// Most recently modified file.
    Latest,
    /// File id, falling back to a name search if no such id exists.
    IdOrName(String),
}

struct Connection {
    session: AuthenticatedSession,
    gateway: TransferGateway,
}

/// List, upload and download against the remote store.
pub struct FileRepository {
    store: CredentialStore,
    authorizer: InteractiveAuthorizer,
    backend_factory: BackendFactory,
    sniffer: Arc<dyn ContentSniffer>,
    connection: OnceCell<Connection>,
}

impl FileRepository {
    pub fn new(
        store: CredentialStore,
        authorizer: InteractiveAuthorizer,
        backend_factory: BackendFactory,
    ) -> Self {
        Self {
            store,
            authorizer,
            backend_factory,
            sniffer: Arc::new(SystemSniffer::new()),
            connection: OnceCell::new(),
        }
    }

    /// Repository backed by Google Drive.
    pub fn for_drive(store: CredentialStore, authorizer: InteractiveAuthorizer) -> Self {
        Self::new(store, authorizer, Box::new(create_drive_backend))
    }

    /// Replace the content-type sniffer used for uploads.
    pub fn with_sniffer(mut self, sniffer: Arc<dyn ContentSniffer>) -> Self {
        self.sniffer = sniffer;
        self
    }

    /// Establish the session if this process has not done so yet.
    ///
    /// # Errors
    /// - `Auth` if no usable credential can be obtained; fatal for the run
    pub async fn authenticate(&self) -> Result<&TransferGateway> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let session = AuthenticatedSession::establish(&self.store, &self.authorizer).await?;
                let backend = (self.backend_factory)(session.transport())?;
                tracing::debug!(component = COMPONENT, backend = backend.name(), "Authenticated");
                let gateway = TransferGateway::new(backend, self.sniffer.clone());
                Ok::<_, Error>(Connection { session, gateway })
            })
            .await?;
        Ok(&connection.gateway)
    }

    /// The established session, if any.
    pub fn session(&self) -> Option<&AuthenticatedSession> {
        self.connection.get().map(|connection| &connection.session)
    }

    pub async fn list_files(&self, query: &ListQuery) -> Result<Vec<RemoteFileHandle>> {
        tracing::debug!(component = COMPONENT, page_size = query.page_size, "Listing files");
        let files = self.authenticate().await?.list(query).await?;
        tracing::debug!(component = COMPONENT, count = files.len(), "Listed files");
        Ok(files)
    }

    /// Resolve a download target to a remote file.
    ///
    /// Id lookups return full metadata; name and latest lookups return the
    /// listing entry.
    ///
    /// # Errors
    /// - `NotFound` if the target matches no remote file
    pub async fn resolve(&self, target: &DownloadTarget) -> Result<RemoteFileHandle> {
        let gateway = self.authenticate().await?;
        match target {
            DownloadTarget::Id(id) => gateway.metadata(id).await,
            DownloadTarget::Name(name) => by_name(gateway, name).await,
            DownloadTarget::Latest => gateway
                .latest()
                .await?
                .ok_or_else(|| Error::NotFound("no files in remote store".to_string())),
            DownloadTarget::IdOrName(key) => match gateway.metadata(key).await {
                Err(Error::NotFound(_)) => by_name(gateway, key).await,
                other => other,
            },
        }
    }

    /// Download a remote file into `dest_dir`.
    pub async fn download_file(
        &self,
        target: &DownloadTarget,
        dest_dir: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<DownloadedFile> {
        tracing::debug!(component = COMPONENT, target = ?target, "Downloading file");
        let handle = self.resolve(target).await?;
        let gateway = self.authenticate().await?;
        let downloaded = if handle.size.is_some() {
            gateway.download_handle(handle, dest_dir, progress).await?
        } else {
            gateway.download(&handle.id, dest_dir, progress).await?
        };
        tracing::debug!(
            component = COMPONENT,
            id = %downloaded.handle.id,
            path = %downloaded.path.display(),
            "Downloaded file"
        );
        Ok(downloaded)
    }

    /// Upload a local file.
    pub async fn upload_file(
        &self,
        path: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<RemoteFileHandle> {
        tracing::debug!(component = COMPONENT, path = %path.display(), "Uploading file");
        let handle = self.authenticate().await?.upload(path, progress).await?;
        tracing::debug!(component = COMPONENT, id = %handle.id, "Uploaded file");
        Ok(handle)
    }
}

async fn by_name(gateway: &TransferGateway, name: &str) -> Result<RemoteFileHandle> {
    gateway
        .find_by_name(name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("file named {}", name)))
}
