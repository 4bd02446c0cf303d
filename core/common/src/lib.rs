//! Common utilities and types shared across driveport crates.
//!
//! This module provides the error taxonomy used by every layer and the
//! value types exchanged between the transfer layer and its callers.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{RemoteFileHandle, SecretString, TransferProgress};
