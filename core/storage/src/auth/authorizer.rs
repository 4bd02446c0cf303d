//! One-time interactive consent flow.

use async_trait::async_trait;
use oauth2::{CsrfToken, PkceCodeChallenge, PkceCodeVerifier, Scope};
use std::sync::Arc;
use url::Url;

use driveport_common::{Error, Result};

use super::authorization::Authorization;
use super::config::ClientConfig;
use super::endpoint::{oauth_client, OAuthEndpoint, TokenEndpoint};

/// Consent URL together with the values needed to redeem its answer.
pub struct ConsentRequest {
    /// URL the user visits to grant access.
    pub url: Url,
    /// CSRF state embedded in the URL.
    pub state: CsrfToken,
    verifier: PkceCodeVerifier,
}

/// Presents the consent URL and collects the user's answer.
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    /// Show `consent_url` and wait for the authorization code.
    ///
    /// Returns `None` when the user gives up (empty answer or end of input).
    async fn request_code(&self, consent_url: &Url) -> Result<Option<String>>;
}

/// Console prompt: prints the URL and reads one line from stdin.
#[derive(Debug, Clone, Default)]
pub struct ConsolePrompt {
    open_browser: bool,
}

impl ConsolePrompt {
    pub fn new(open_browser: bool) -> Self {
        Self { open_browser }
    }
}

#[async_trait]
impl ConsentPrompt for ConsolePrompt {
    async fn request_code(&self, consent_url: &Url) -> Result<Option<String>> {
        eprintln!(
            "Go to the following link in your browser, then paste the authorization code \
             (or the full URL you were redirected to):\n\n{}\n",
            consent_url
        );

        if self.open_browser {
            if let Err(e) = open::that(consent_url.as_str()) {
                tracing::warn!(component = "ConsolePrompt", "Could not open browser: {}", e);
            }
        }

        let (read, line) = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|read| (read, line))
        })
        .await
        .map_err(|e| Error::Exchange(format!("Prompt task failed: {}", e)))?
        .map_err(|e| Error::Exchange(format!("Unable to read authorization code: {}", e)))?;

        let answer = line.trim();
        if read == 0 || answer.is_empty() {
            return Ok(None);
        }
        Ok(Some(answer.to_string()))
    }
}

/// Drives the consent flow when no reusable authorization exists.
pub struct InteractiveAuthorizer {
    config: ClientConfig,
    endpoint: Arc<dyn TokenEndpoint>,
    prompt: Arc<dyn ConsentPrompt>,
}

impl InteractiveAuthorizer {
    pub fn new(
        config: ClientConfig,
        endpoint: Arc<dyn TokenEndpoint>,
        prompt: Arc<dyn ConsentPrompt>,
    ) -> Self {
        Self {
            config,
            endpoint,
            prompt,
        }
    }

    /// Authorizer using the OAuth2 token endpoint and the console prompt.
    pub fn with_console(config: ClientConfig, open_browser: bool) -> Result<Self> {
        let endpoint = Arc::new(OAuthEndpoint::new(&config)?);
        Ok(Self::new(
            config,
            endpoint,
            Arc::new(ConsolePrompt::new(open_browser)),
        ))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Token endpoint shared with the refresh path.
    pub fn endpoint(&self) -> &dyn TokenEndpoint {
        self.endpoint.as_ref()
    }

    /// Build the consent URL for `config`.
    ///
    /// Requests offline access so the grant carries a refresh token, and
    /// attaches a fresh CSRF state and PKCE challenge.
    pub fn build_consent_url(config: &ClientConfig) -> Result<ConsentRequest> {
        let client = oauth_client(config)?;
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = client
            .authorize_url(CsrfToken::new_random)
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(challenge);
        for scope in config.requested_scopes() {
            request = request.add_scope(Scope::new(scope));
        }
        let (url, state) = request.url();

        Ok(ConsentRequest {
            url,
            state,
            verifier,
        })
    }

    /// Run the consent flow and exchange the answer for an authorization.
    ///
    /// # Errors
    /// - `UserAborted` if the user gives no answer
    /// - `Exchange` if the answer cannot be redeemed
    pub async fn obtain(&self) -> Result<Authorization> {
        let request = Self::build_consent_url(&self.config)?;
        tracing::info!(component = "InteractiveAuthorizer", "Authorization required");

        let answer = self
            .prompt
            .request_code(&request.url)
            .await?
            .ok_or(Error::UserAborted)?;
        let code = parse_answer(&answer, &request.state)?;

        let authorization = self
            .endpoint
            .exchange_code(&code, Some(request.verifier))
            .await
            .map_err(|e| match e {
                Error::Exchange(_) => e,
                other => Error::Exchange(other.to_string()),
            })?;

        tracing::info!(component = "InteractiveAuthorizer", "Authorization granted");
        Ok(authorization)
    }
}

/// Extract the authorization code from a bare code or a pasted redirect URL.
fn parse_answer(answer: &str, expected_state: &CsrfToken) -> Result<String> {
    let Ok(redirect) = Url::parse(answer) else {
        return Ok(answer.to_string());
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in redirect.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match error.as_deref() {
        Some("access_denied") => return Err(Error::UserAborted),
        Some(other) => return Err(Error::Exchange(format!("Consent failed: {}", other))),
        None => {}
    }

    if let Some(state) = state {
        if state != *expected_state.secret() {
            return Err(Error::Exchange(
                "State in redirect URL does not match the consent request".to_string(),
            ));
        }
    }

    code.ok_or_else(|| Error::Exchange("Redirect URL carries no authorization code".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::DRIVE_FILE_SCOPE;
    use crate::testing::{ScriptedEndpoint, ScriptedPrompt};

    fn config() -> ClientConfig {
        ClientConfig::new("test_id", Some("test_secret".to_string()))
    }

    fn query_value(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_consent_url_contents() {
        let request = InteractiveAuthorizer::build_consent_url(&config()).unwrap();
        let url = &request.url;

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(query_value(url, "client_id").as_deref(), Some("test_id"));
        assert_eq!(query_value(url, "scope").as_deref(), Some(DRIVE_FILE_SCOPE));
        assert_eq!(query_value(url, "access_type").as_deref(), Some("offline"));
        assert_eq!(query_value(url, "response_type").as_deref(), Some("code"));
        assert_eq!(query_value(url, "code_challenge_method").as_deref(), Some("S256"));
        assert_eq!(
            query_value(url, "state").as_deref(),
            Some(request.state.secret().as_str())
        );
    }

    #[test]
    fn test_parse_bare_code() {
        let state = CsrfToken::new("s".to_string());
        assert_eq!(parse_answer("4/0AX4XfWh", &state).unwrap(), "4/0AX4XfWh");
    }

    #[test]
    fn test_parse_redirect_url() {
        let state = CsrfToken::new("xyz".to_string());
        let code = parse_answer("http://localhost/?state=xyz&code=4/abc&scope=x", &state).unwrap();
        assert_eq!(code, "4/abc");
    }

    #[test]
    fn test_parse_redirect_url_state_mismatch() {
        let state = CsrfToken::new("xyz".to_string());
        let result = parse_answer("http://localhost/?state=other&code=4/abc", &state);
        assert!(matches!(result, Err(Error::Exchange(_))));
    }

    #[test]
    fn test_parse_redirect_url_access_denied() {
        let state = CsrfToken::new("xyz".to_string());
        let result = parse_answer("http://localhost/?error=access_denied&state=xyz", &state);
        assert!(matches!(result, Err(Error::UserAborted)));
    }

    #[tokio::test]
    async fn test_obtain_exchanges_code() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let prompt = Arc::new(ScriptedPrompt::answering("4/code"));
        let authorizer = InteractiveAuthorizer::new(config(), endpoint.clone(), prompt.clone());

        let auth = authorizer.obtain().await.unwrap();

        assert_eq!(auth.access_token.expose(), ScriptedEndpoint::INTERACTIVE_TOKEN);
        assert_eq!(endpoint.exchanges(), 1);
        assert_eq!(prompt.calls(), 1);
        assert_eq!(endpoint.last_code().as_deref(), Some("4/code"));
    }

    #[tokio::test]
    async fn test_obtain_without_answer_is_aborted() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let prompt = Arc::new(ScriptedPrompt::silent());
        let authorizer = InteractiveAuthorizer::new(config(), endpoint.clone(), prompt);

        assert!(matches!(authorizer.obtain().await, Err(Error::UserAborted)));
        assert_eq!(endpoint.exchanges(), 0);
    }

    #[tokio::test]
    async fn test_obtain_exchange_failure() {
        let endpoint = Arc::new(ScriptedEndpoint::new().failing_exchange());
        let prompt = Arc::new(ScriptedPrompt::answering("4/code"));
        let authorizer = InteractiveAuthorizer::new(config(), endpoint, prompt);

        let err = authorizer.obtain().await.unwrap_err();
        assert!(matches!(err, Error::Exchange(_)));
        assert!(err.is_fatal());
    }
}
