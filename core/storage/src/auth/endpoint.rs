//! Token endpoint: code exchange and refresh.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    PkceCodeVerifier, RedirectUrl, RefreshToken, TokenResponse, TokenUrl,
};

use driveport_common::{Error, Result};

use super::authorization::Authorization;
use super::config::ClientConfig;

/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// OAuth2 client with authorization and token endpoints configured.
pub(crate) type OAuthClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Build the OAuth2 client for a configuration.
pub(crate) fn oauth_client(config: &ClientConfig) -> Result<OAuthClient> {
    let mut client = BasicClient::new(ClientId::new(config.client_id.clone()))
        .set_auth_uri(
            AuthUrl::new(config.auth_uri.clone())
                .map_err(|e| Error::Config(format!("Invalid auth URL: {}", e)))?,
        )
        .set_token_uri(
            TokenUrl::new(config.token_uri.clone())
                .map_err(|e| Error::Config(format!("Invalid token URL: {}", e)))?,
        )
        .set_redirect_uri(
            RedirectUrl::new(config.redirect_url().to_string())
                .map_err(|e| Error::Config(format!("Invalid redirect URL: {}", e)))?,
        );

    if let Some(secret) = &config.client_secret {
        client = client.set_client_secret(ClientSecret::new(secret.clone()));
    }

    Ok(client)
}

/// Provider token endpoint.
///
/// Split out of the authorizer so tests can count and script exchanges.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    /// - `Exchange` if the provider rejects the code or is unreachable
    async fn exchange_code(
        &self,
        code: &str,
        verifier: Option<PkceCodeVerifier>,
    ) -> Result<Authorization>;

    /// Obtain a new access token from a refresh token.
    ///
    /// # Errors
    /// - `Auth` if the refresh token was revoked or the provider is unreachable
    async fn refresh(&self, refresh_token: &str) -> Result<Authorization>;
}

/// Token endpoint speaking OAuth2 over HTTP.
pub struct OAuthEndpoint {
    client: OAuthClient,
    http: oauth2::reqwest::Client,
    scopes: Vec<String>,
}

impl OAuthEndpoint {
    /// Create a new endpoint for the client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = oauth2::reqwest::ClientBuilder::new()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client: oauth_client(config)?,
            http,
            scopes: config.requested_scopes(),
        })
    }

    /// Convert a token response, keeping `previous_refresh` when none is returned.
    fn to_authorization(
        &self,
        response: &BasicTokenResponse,
        previous_refresh: Option<&str>,
    ) -> Authorization {
        let refresh_token = response
            .refresh_token()
            .map(|token| token.secret().clone())
            .or_else(|| previous_refresh.map(str::to_string));

        let expires_in = response
            .expires_in()
            .unwrap_or_else(|| std::time::Duration::from_secs(DEFAULT_TOKEN_LIFETIME_SECS));
        let expiry = Utc::now()
            + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1));

        let scope = match response.scopes() {
            Some(scopes) => scopes.iter().map(|s| s.as_str().to_string()).collect::<Vec<_>>(),
            None => self.scopes.clone(),
        };

        Authorization::new(
            response.access_token().secret().clone(),
            refresh_token,
            expiry,
            scope,
        )
    }
}

#[async_trait]
impl TokenEndpoint for OAuthEndpoint {
    async fn exchange_code(
        &self,
        code: &str,
        verifier: Option<PkceCodeVerifier>,
    ) -> Result<Authorization> {
        let mut request = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()));
        if let Some(verifier) = verifier {
            request = request.set_pkce_verifier(verifier);
        }

        let response = request
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Exchange(format!("Token exchange failed: {}", e)))?;

        let authorization = self.to_authorization(&response, None);
        if authorization.refresh_token().is_none() {
            tracing::warn!(
                component = "OAuthEndpoint",
                "No refresh token received; the next run will ask for consent again"
            );
        }
        Ok(authorization)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Authorization> {
        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Auth(format!("Token refresh failed: {}", e)))?;

        Ok(self.to_authorization(&response, Some(refresh_token)))
    }
}
