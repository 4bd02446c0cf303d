//! Credential lifecycle and authenticated transfers for driveport.
//!
//! This crate turns a one-time interactive consent into a reusable
//! authorization and drives list/upload/download operations against a
//! remote file store through a provider-agnostic backend trait.
//!
//! # Design Principles
//! - One session per process: established lazily, reused for every operation
//! - Provider isolation: wire formats live behind `RemoteBackend`
//! - Streaming: transfers move in chunks with progress at chunk boundaries
//! - All-or-nothing local writes: credentials and downloads are renamed into place

pub mod archive;
pub mod auth;
pub mod content_type;
pub mod gateway;
pub mod gdrive;
pub mod memory;
pub mod provider;
pub mod repository;
pub mod session;
pub mod settings;

#[cfg(test)]
mod testing;

pub use archive::extract;
pub use auth::{
    Authorization, ClientConfig, ConsentPrompt, ConsolePrompt, CredentialState, CredentialStore,
    InteractiveAuthorizer, OAuthEndpoint, TokenEndpoint, DRIVE_FILE_SCOPE,
};
pub use content_type::{ContentSniffer, ExtensionSniffer, SystemSniffer};
pub use gateway::{no_progress, DownloadedFile, ProgressSink, TransferGateway};
pub use gdrive::{create_drive_backend, DriveBackend};
pub use memory::MemoryBackend;
pub use provider::{BackendFactory, ByteStream, ListQuery, RemoteBackend, UploadRequest, UploadSession};
pub use repository::{DownloadTarget, FileRepository};
pub use session::{AuthenticatedSession, AuthorizationSource, Transport};
pub use settings::Settings;
