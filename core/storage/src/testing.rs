//! Scripted collaborators shared by unit tests.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use oauth2::PkceCodeVerifier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use driveport_common::{Error, Result};

use crate::auth::{Authorization, ConsentPrompt, TokenEndpoint, DRIVE_FILE_SCOPE};

/// Token endpoint that counts calls and hands out canned tokens.
pub(crate) struct ScriptedEndpoint {
    exchanges: AtomicUsize,
    refreshes: AtomicUsize,
    last_code: Mutex<Option<String>>,
    fail_exchange: bool,
    fail_refresh: bool,
}

impl ScriptedEndpoint {
    pub const INTERACTIVE_TOKEN: &'static str = "ya29.interactive";
    pub const REFRESHED_TOKEN: &'static str = "ya29.refreshed";

    pub fn new() -> Self {
        Self {
            exchanges: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            last_code: Mutex::new(None),
            fail_exchange: false,
            fail_refresh: false,
        }
    }

    pub fn failing_exchange(mut self) -> Self {
        self.fail_exchange = true;
        self
    }

    pub fn failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn last_code(&self) -> Option<String> {
        self.last_code.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenEndpoint for ScriptedEndpoint {
    async fn exchange_code(
        &self,
        code: &str,
        _verifier: Option<PkceCodeVerifier>,
    ) -> Result<Authorization> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        *self.last_code.lock().unwrap() = Some(code.to_string());
        if self.fail_exchange {
            return Err(Error::Exchange("invalid_grant".to_string()));
        }
        Ok(Authorization::new(
            Self::INTERACTIVE_TOKEN,
            Some("1//interactive".to_string()),
            Utc::now() + Duration::hours(1),
            vec![DRIVE_FILE_SCOPE.to_string()],
        ))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Authorization> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            return Err(Error::Auth("Token refresh failed: invalid_grant".to_string()));
        }
        Ok(Authorization::new(
            Self::REFRESHED_TOKEN,
            Some(refresh_token.to_string()),
            Utc::now() + Duration::hours(1),
            vec![DRIVE_FILE_SCOPE.to_string()],
        ))
    }
}

/// Consent prompt with a fixed answer that records the URLs it was shown.
pub(crate) struct ScriptedPrompt {
    answer: Option<String>,
    urls: Mutex<Vec<Url>>,
}

impl ScriptedPrompt {
    pub fn answering(code: &str) -> Self {
        Self {
            answer: Some(code.to_string()),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn silent() -> Self {
        Self {
            answer: None,
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn shown_urls(&self) -> Vec<Url> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConsentPrompt for ScriptedPrompt {
    async fn request_code(&self, consent_url: &Url) -> Result<Option<String>> {
        self.urls.lock().unwrap().push(consent_url.clone());
        Ok(self.answer.clone())
    }
}

/// Minimal HTTP/1.1 server answering each connection with the next canned
/// response. Resolves to the request heads it received, in order.
pub(crate) async fn serve_responses(
    responses: Vec<String>,
) -> (String, tokio::task::JoinHandle<Vec<String>>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut heads = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            let head_end = loop {
                let read = socket.read(&mut buf).await.unwrap();
                assert!(read > 0, "connection closed before end of headers");
                received.extend_from_slice(&buf[..read]);
                if let Some(pos) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let head = String::from_utf8_lossy(&received[..head_end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .map(|value| value.trim().parse::<usize>().unwrap())
                .unwrap_or(0);
            while received.len() < head_end + body_len {
                let read = socket.read(&mut buf).await.unwrap();
                assert!(read > 0, "connection closed before end of body");
                received.extend_from_slice(&buf[..read]);
            }

            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            heads.push(head);
        }
        heads
    });

    (base_url, handle)
}

/// Canned HTTP response that closes the connection.
pub(crate) fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!("HTTP/1.1 {}\r\n", status);
    for (name, value) in headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    ));
    response
}
