//! Google Drive backend.
//!
//! Speaks the Drive v3 REST API over an authenticated `Transport`:
//! - Listing with name filters and modification-time ordering
//! - Streaming downloads via `alt=media`
//! - Resumable uploads in 2 MiB chunks

pub mod client;

pub use client::{create_drive_backend, DriveBackend, DriveFile};
