//! Authorization grant and its freshness classification.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use driveport_common::SecretString;

/// Tokens expiring within this many seconds are already treated as stale.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Where an authorization stands relative to its expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// Access token usable as is.
    Fresh,
    /// Expired, but a refresh token can renew it without user interaction.
    Stale,
    /// Expired and not refreshable.
    Invalid,
}

/// Credential bundle granting API access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Access token for API requests.
    pub access_token: SecretString,
    /// Refresh token for obtaining new access tokens.
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
    /// When the access token expires.
    pub expiry: DateTime<Utc>,
    /// Granted scopes.
    #[serde(default)]
    pub scope: BTreeSet<String>,
}

impl Authorization {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expiry: DateTime<Utc>,
        scope: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            access_token: SecretString::new(access_token),
            refresh_token: refresh_token.map(SecretString::new),
            expiry,
            scope: scope.into_iter().collect(),
        }
    }

    /// Refresh token, if present and non-empty.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token
            .as_ref()
            .map(SecretString::expose)
            .filter(|token| !token.is_empty())
    }

    /// Classify the authorization at `now`.
    pub fn state_at(&self, now: DateTime<Utc>) -> CredentialState {
        if self.expiry > now + Duration::seconds(EXPIRY_SKEW_SECS) {
            CredentialState::Fresh
        } else if self.refresh_token().is_some() {
            CredentialState::Stale
        } else {
            CredentialState::Invalid
        }
    }

    /// Classify the authorization now.
    pub fn state(&self) -> CredentialState {
        self.state_at(Utc::now())
    }
}
