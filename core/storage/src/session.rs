//! Authenticated session and its request-signing transport.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder};

use driveport_common::{Error, Result};

use crate::auth::{Authorization, CredentialState, CredentialStore, InteractiveAuthorizer};

const COMPONENT: &str = "AuthenticatedSession";

/// How the session's authorization was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationSource {
    /// Loaded from the credential file and still fresh.
    Cached,
    /// Renewed with the stored refresh token.
    Refreshed,
    /// Granted through the interactive consent flow.
    Interactive,
}

/// HTTP transport that attaches the access token to every request.
///
/// Clones share one connection pool.
#[derive(Clone)]
pub struct Transport {
    http: Client,
}

impl Transport {
    /// Create a transport signing requests with `access_token`.
    pub fn new(access_token: &str) -> Result<Self> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|_| Error::Auth("Access token is not a valid header value".to_string()))?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);

        let http = Client::builder()
            .user_agent(concat!("driveport/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            // Resumable uploads answer 308 without a Location header
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Remote(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http })
    }

    /// Start a signed request.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http.request(method, url)
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(Method::PUT, url)
    }
}

/// A valid authorization and the transport bound to it.
///
/// Established once per invocation and reused for every operation.
pub struct AuthenticatedSession {
    authorization: Authorization,
    source: AuthorizationSource,
    transport: Transport,
}

impl AuthenticatedSession {
    /// Establish a session from the stored credential, refreshing it or
    /// falling back to interactive consent as needed.
    ///
    /// # Postconditions
    /// - A fresh stored credential is used without contacting the provider
    /// - A stale credential is refreshed before any interactive attempt
    /// - Newly obtained or refreshed credentials are saved to `store`
    ///
    /// # Errors
    /// - `Auth` if neither the stored credential nor the interactive flow
    ///   yields an authorization
    pub async fn establish(
        store: &CredentialStore,
        authorizer: &InteractiveAuthorizer,
    ) -> Result<Self> {
        let stored = match store.load().await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(component = COMPONENT, "Ignoring stored credentials: {}", e);
                None
            }
        };

        let (authorization, source) = match stored {
            Some(authorization) => match authorization.state() {
                CredentialState::Fresh => (authorization, AuthorizationSource::Cached),
                CredentialState::Stale => Self::refresh_or_obtain(store, authorizer, &authorization).await?,
                CredentialState::Invalid => {
                    tracing::info!(component = COMPONENT, "Stored credentials expired");
                    (Self::obtain(store, authorizer).await?, AuthorizationSource::Interactive)
                }
            },
            None => (Self::obtain(store, authorizer).await?, AuthorizationSource::Interactive),
        };

        let transport = Transport::new(authorization.access_token.expose())?;
        tracing::debug!(component = COMPONENT, source = ?source, "Session established");

        Ok(Self {
            authorization,
            source,
            transport,
        })
    }

    async fn refresh_or_obtain(
        store: &CredentialStore,
        authorizer: &InteractiveAuthorizer,
        stale: &Authorization,
    ) -> Result<(Authorization, AuthorizationSource)> {
        let Some(refresh_token) = stale.refresh_token() else {
            return Ok((Self::obtain(store, authorizer).await?, AuthorizationSource::Interactive));
        };

        tracing::info!(component = COMPONENT, "Refreshing expired access token");
        match authorizer.endpoint().refresh(refresh_token).await {
            Ok(refreshed) => {
                Self::persist(store, &refreshed).await;
                Ok((refreshed, AuthorizationSource::Refreshed))
            }
            Err(e) => {
                tracing::warn!(component = COMPONENT, "Refresh failed, re-authorizing: {}", e);
                // A rejected grant must not be retried by the next run.
                if let Err(e) = store.clear().await {
                    tracing::warn!(component = COMPONENT, "{}", e);
                }
                Ok((Self::obtain(store, authorizer).await?, AuthorizationSource::Interactive))
            }
        }
    }

    async fn obtain(
        store: &CredentialStore,
        authorizer: &InteractiveAuthorizer,
    ) -> Result<Authorization> {
        let authorization = authorizer
            .obtain()
            .await
            .map_err(|e| Error::Auth(format!("No usable credential: {}", e)))?;
        Self::persist(store, &authorization).await;
        Ok(authorization)
    }

    /// Save a new authorization; the session stays usable if this fails.
    async fn persist(store: &CredentialStore, authorization: &Authorization) {
        if let Err(e) = store.save(authorization).await {
            tracing::warn!(component = COMPONENT, "{}", e);
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn authorization(&self) -> &Authorization {
        &self.authorization
    }

    pub fn source(&self) -> AuthorizationSource {
        self.source
    }
}
