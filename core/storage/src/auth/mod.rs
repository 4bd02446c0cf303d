//! Credential lifecycle for the remote store.
//!
//! This module turns a one-time interactive consent into a reusable
//! authorization:
//! - `Authorization` with fresh/stale/invalid classification
//! - `CredentialStore` persisting it atomically with owner-only permissions
//! - `InteractiveAuthorizer` running the consent flow over a `ConsentPrompt`
//! - `TokenEndpoint` exchanging codes and refresh tokens via OAuth2

pub mod authorization;
pub mod authorizer;
pub mod config;
pub mod endpoint;
pub mod store;

pub use authorization::{Authorization, CredentialState};
pub use authorizer::{ConsentPrompt, ConsentRequest, ConsolePrompt, InteractiveAuthorizer};
pub use config::{ClientConfig, DRIVE_FILE_SCOPE};
pub use endpoint::{OAuthEndpoint, TokenEndpoint};
pub use store::CredentialStore;
