// Libby Core - OverDrive Libby integration for calibre
// Copyright (C) 2025 Libby Core contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! HTTP client for the Libby identity service
//!
//! This module wraps `reqwest::Client` for the few Libby endpoints the plugin
//! core needs:
//! - Per-call timeout taken from the plugin's network settings
//! - Bounded retry with exponential backoff
//! - Bearer authentication with the chip identity once one is issued
//!
//! # Retry Strategy
//! - `max_retries` re-attempts after the first try (total `max_retries + 1`)
//! - Exponential backoff: 1s, 2s, 4s between attempts
//! - Retry on: timeouts, connection failures, requests cut off mid-flight,
//!   5xx responses
//! - No retry on: 4xx client errors
//! - Out of attempts: `NetworkFailure` carrying the number of attempts made
//!
//! # Endpoints
//! - `POST /chip?client=dewey` - new anonymous chip and identity
//! - `POST /chip/clone/code` - link the chip to the account behind a setup code
//! - `GET /chip/sync` - current sync state (linked cards)

use crate::api::auth::{ChipResponse, CloneResponse, IdentityService, IdentityToken, SetupCode};
use crate::api::cards::SyncState;
use crate::error::{LibbyError, Result};
use crate::storage::Preferences;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Libby identity ("sentry") service
pub const DEFAULT_BASE_URL: &str = "https://sentry-read.svc.overdrive.com";

/// Initial retry delay in seconds (exponential backoff: 1s, 2s, 4s)
const INITIAL_RETRY_DELAY_SECS: u64 = 1;

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of re-attempts after the first try
const DEFAULT_MAX_RETRIES: u32 = 1;

/// Configuration for LibbyClient
/// Provides a builder pattern for client customization
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            user_agent: format!("libby-calibre-plugin/{} (libby-core)", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Timeout and retry count from the stored network settings
    pub fn from_preferences(prefs: &Preferences) -> Self {
        Self::builder()
            .timeout(prefs.network_timeout())
            .max_retries(prefs.network_retry())
            .build()
    }

    /// Upper bound on the time one call can block, including backoff
    pub fn worst_case_duration(&self) -> Duration {
        let attempts = self.max_retries + 1;
        let backoff: Duration = (1..attempts).map(backoff_delay).sum();
        self.timeout * attempts + backoff
    }
}

/// Builder for ClientConfig
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.config.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff before attempt `attempt + 1` (1s, 2s, 4s...)
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(INITIAL_RETRY_DELAY_SECS * 2_u64.pow(attempt.saturating_sub(1)))
}

/// HTTP client for the Libby identity service
///
/// One client corresponds to one chip: the identity issued by
/// [`IdentityService::get_chip`] is remembered and sent as a bearer token on
/// every later call.
///
/// # Example
/// ```rust,no_run
/// use libby_core::api::client::{ClientConfig, LibbyClient};
/// use std::time::Duration;
///
/// # async fn example() -> libby_core::error::Result<()> {
/// let config = ClientConfig::builder()
///     .timeout(Duration::from_secs(60))
///     .max_retries(2)
///     .build();
/// let client = LibbyClient::new(config)?;
/// let state = client.sync().await?;
/// println!("{} card(s)", state.cards.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LibbyClient {
    /// Underlying HTTP client
    client: Client,
    /// Identity of the current chip, once issued
    identity: Arc<Mutex<Option<IdentityToken>>>,
    /// Client configuration
    config: ClientConfig,
}

impl LibbyClient {
    /// Create a new client without an identity
    ///
    /// # Errors
    /// Returns error if the user agent is not a valid header value or the
    /// HTTP client cannot be built
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| LibbyError::InvalidInput(format!("Invalid user agent: {}", e)))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            identity: Arc::new(Mutex::new(None)),
            config,
        })
    }

    /// Create a client that reuses a previously stored identity
    pub fn with_identity(config: ClientConfig, identity: IdentityToken) -> Result<Self> {
        let client = Self::new(config)?;
        Ok(Self {
            identity: Arc::new(Mutex::new(Some(identity))),
            ..client
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Identity of the current chip, if any
    pub async fn identity(&self) -> Option<IdentityToken> {
        self.identity.lock().await.clone()
    }

    /// Current sync state, including linked cards
    pub async fn sync(&self) -> Result<SyncState> {
        let url = self.url("/chip/sync");
        self.request_with_retry("/chip/sync", true, |client, headers| {
            client.get(&url).headers(headers)
        })
        .await
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url, endpoint)
    }

    /// Execute request with retry logic and exponential backoff
    ///
    /// Retry strategy:
    /// - Attempt 1: Immediate
    /// - Attempt n: After 2^(n-2) seconds
    /// - Max attempts: `max_retries + 1`
    ///
    /// Retries on transport failures and 5xx. When the attempts run out on
    /// either, the result is `NetworkFailure` with the attempt count; any
    /// other outcome is returned as is.
    async fn request_with_retry<T, F>(
        &self,
        endpoint: &str,
        authenticated: bool,
        request_builder: F,
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(&Client, HeaderMap) -> reqwest::RequestBuilder,
    {
        let total_attempts = self.config.max_retries + 1;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let headers = self.build_auth_headers(authenticated).await?;
            let request = request_builder(&self.client, headers).build()?;
            debug!(endpoint, attempt = attempts, of = total_attempts, "Sending request");

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return self.handle_success_response(response, endpoint).await;
                    }

                    if status.is_server_error() {
                        if attempts < total_attempts {
                            warn!(
                                endpoint,
                                status = status.as_u16(),
                                attempt = attempts,
                                "Server error, retrying"
                            );
                            sleep(backoff_delay(attempts)).await;
                            continue;
                        }
                        let body = response.text().await.unwrap_or_default();
                        return Err(LibbyError::network_error(
                            format!("{} returned {}: {}", endpoint, status, body),
                            attempts,
                            true,
                        ));
                    }

                    return self.handle_error_response(response, endpoint).await;
                }

                Err(e) if attempts < total_attempts && is_retryable_network_error(&e) => {
                    warn!(endpoint, error = %e, attempt = attempts, "Network error, retrying");
                    sleep(backoff_delay(attempts)).await;
                }

                Err(e) => {
                    if e.is_timeout() && total_attempts == 1 {
                        return Err(LibbyError::Timeout(self.config.timeout.as_secs()));
                    }
                    return Err(LibbyError::network_error(
                        format!("Request to {} failed: {}", endpoint, e),
                        attempts,
                        is_retryable_network_error(&e),
                    ));
                }
            }
        }
    }

    /// Bearer header from the chip identity, when the call needs one
    async fn build_auth_headers(&self, authenticated: bool) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if !authenticated {
            return Ok(headers);
        }

        let identity = self.identity.lock().await;
        match identity.as_ref() {
            Some(token) => {
                let auth_value = format!("Bearer {}", token.as_str());
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&auth_value).map_err(|e| {
                        LibbyError::InvalidInput(format!("Invalid identity token: {}", e))
                    })?,
                );
                Ok(headers)
            }
            None => Err(LibbyError::internal("No chip identity; call get_chip first")),
        }
    }

    /// Handle successful HTTP response
    async fn handle_success_response<T>(&self, response: Response, endpoint: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        let response_text = response.text().await.map_err(|e| LibbyError::ApiRequestFailed {
            message: format!("Failed to read response body: {}", e),
            status_code: Some(status.as_u16()),
            endpoint: Some(endpoint.to_string()),
        })?;

        // Some endpoints answer 204 or an empty body
        let body = if response_text.trim().is_empty() { "{}" } else { response_text.as_str() };

        serde_json::from_str::<T>(body).map_err(|e| {
            let snippet: String = response_text.chars().take(400).collect();
            LibbyError::InvalidApiResponse {
                message: format!("Parse error on {}: {}. Body starts: {}", endpoint, e, snippet),
                response_body: Some(response_text),
            }
        })
    }

    /// Handle error HTTP response
    async fn handle_error_response<T>(&self, response: Response, endpoint: &str) -> Result<T> {
        let status = response.status();
        let error_body = response.text().await.unwrap_or_default();

        Err(LibbyError::api_failed(
            format!("{} returned {}: {}", endpoint, status, error_body),
            Some(status.as_u16()),
            Some(endpoint.to_string()),
        ))
    }
}

impl IdentityService for LibbyClient {
    async fn get_chip(&self) -> Result<ChipResponse> {
        let url = self.url("/chip");
        let chip: ChipResponse = self
            .request_with_retry("/chip", false, |client, headers| {
                client.post(&url).query(&[("client", "dewey")]).headers(headers)
            })
            .await?;

        if chip.identity.is_empty() {
            return Err(LibbyError::InvalidApiResponse {
                message: "Chip response has no identity".to_string(),
                response_body: None,
            });
        }

        *self.identity.lock().await = Some(chip.identity.clone());
        Ok(chip)
    }

    async fn clone_by_code(&self, code: &SetupCode) -> Result<CloneResponse> {
        let url = self.url("/chip/clone/code");
        let body = serde_json::json!({ "code": code.as_str() });
        self.request_with_retry("/chip/clone/code", true, |client, headers| {
            client.post(&url).headers(headers).json(&body)
        })
        .await
    }

    async fn is_logged_in(&self) -> Result<bool> {
        Ok(self.sync().await?.is_logged_in())
    }
}

/// Check if a transport error is worth another attempt
///
/// `is_request` covers a connection closed or reset before the response
/// arrived, as happens when a kept-alive socket goes stale.
fn is_retryable_network_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

// ===== TESTS =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::exchange_setup_code;
    use crate::storage::{PrefKey, PrefValue, PreferenceBatch, PreferenceStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    type Seen = Arc<StdMutex<Vec<String>>>;

    /// Minimal HTTP/1.1 responder; `respond` gets the request index and raw text
    async fn spawn_server<F>(respond: F) -> (String, Seen)
    where
        F: Fn(usize, &str) -> (u16, String) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen: Seen = Arc::new(StdMutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        tokio::spawn(async move {
            let mut index = 0;
            while let Ok((mut socket, _)) = listener.accept().await {
                let request = read_request(&mut socket).await;
                let (status, body) = respond(index, &request);
                index += 1;
                log.lock().unwrap().push(request);
                write_response(&mut socket, status, &body).await;
            }
        });

        (format!("http://{}", addr), seen)
    }

    /// Responder whose first `failing` connections get no answer
    ///
    /// Those connections are closed right after the request is read, or held
    /// open past any client timeout when `hold` is set. Later connections are
    /// served a chip. Returns the base URL and the number of accepted
    /// connections.
    async fn spawn_unreliable_server(failing: usize, hold: bool) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&accepted);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let index = count.fetch_add(1, Ordering::SeqCst);
                read_request(&mut socket).await;
                if index >= failing {
                    write_response(&mut socket, 200, CHIP).await;
                } else if hold {
                    tokio::spawn(async move {
                        sleep(Duration::from_secs(30)).await;
                        drop(socket);
                    });
                }
            }
        });

        (format!("http://{}", addr), accepted)
    }

    async fn write_response(socket: &mut TcpStream, status: u16, body: &str) {
        let response = format!(
            "HTTP/1.1 {} Test\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn request_path(request: &str) -> &str {
        request.split_whitespace().nth(1).unwrap_or("")
    }

    fn test_config(base_url: &str, max_retries: u32) -> ClientConfig {
        ClientConfig::builder()
            .base_url(base_url)
            .timeout(Duration::from_secs(5))
            .max_retries(max_retries)
            .build()
    }

    const CHIP: &str =
        r#"{"chip":"c-1","identity":"tok-123456","syncable":false,"primary":true}"#;
    const SYNCED: &str =
        r#"{"result":"synchronized","cards":[{"cardId":"9","advantageKey":"lapl"}]}"#;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::builder()
            .base_url("http://localhost:8080/")
            .timeout(Duration::from_secs(60))
            .max_retries(5)
            .user_agent("TestAgent/1.0")
            .build();

        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.user_agent, "TestAgent/1.0");
    }

    #[test]
    fn test_config_from_preferences() {
        let mut store = PreferenceStore::in_memory();
        let mut batch = PreferenceBatch::new();
        batch.set(PrefKey::NetworkTimeout, PrefValue::Int(90));
        batch.set(PrefKey::NetworkRetry, PrefValue::Int(3));
        store.save(batch).unwrap();

        let config = ClientConfig::from_preferences(store.preferences());
        assert_eq!(config.timeout, Duration::from_secs(90));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_backoff_and_worst_case() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));

        let config = ClientConfig::builder()
            .timeout(Duration::from_secs(30))
            .max_retries(1)
            .build();
        // two 30s attempts plus one 1s pause
        assert_eq!(config.worst_case_duration(), Duration::from_secs(61));
    }

    #[tokio::test]
    async fn test_sync_without_identity_fails_locally() {
        let client = LibbyClient::new(test_config("http://127.0.0.1:9", 0)).unwrap();
        let err = client.sync().await.unwrap_err();
        assert!(matches!(err, LibbyError::InternalError(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let (base, seen) = spawn_server(|index, _| {
            if index == 0 {
                (503, "{}".to_string())
            } else {
                (200, CHIP.to_string())
            }
        })
        .await;

        let client = LibbyClient::new(test_config(&base, 1)).unwrap();
        let chip = client.get_chip().await.unwrap();
        assert_eq!(chip.chip, "c-1");
        assert_eq!(client.identity().await.unwrap().as_str(), "tok-123456");
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (base, seen) =
            spawn_server(|_, _| (404, r#"{"result":"not_found"}"#.to_string())).await;

        let client =
            LibbyClient::with_identity(test_config(&base, 3), IdentityToken::new("tok")).unwrap();
        let err = client.sync().await.unwrap_err();
        assert!(matches!(err, LibbyError::ApiRequestFailed { status_code: Some(404), .. }));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_into_network_failure() {
        let (base, seen) = spawn_server(|_, _| (503, "{}".to_string())).await;

        let client =
            LibbyClient::with_identity(test_config(&base, 2), IdentityToken::new("tok")).unwrap();
        let err = client.sync().await.unwrap_err();
        assert!(matches!(
            err,
            LibbyError::NetworkFailure { attempts: 3, is_transient: true, .. }
        ));
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_dropped_connection_is_retried() {
        let (base, accepted) = spawn_unreliable_server(1, false).await;

        let client = LibbyClient::new(test_config(&base, 1)).unwrap();
        let chip = client.get_chip().await.unwrap();
        assert_eq!(chip.chip, "c-1");
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_into_network_failure() {
        let (base, accepted) = spawn_unreliable_server(usize::MAX, true).await;
        let config = ClientConfig::builder()
            .base_url(&base)
            .timeout(Duration::from_millis(200))
            .max_retries(1)
            .build();

        let client = LibbyClient::new(config).unwrap();
        let err = client.get_chip().await.unwrap_err();
        assert!(matches!(
            err,
            LibbyError::NetworkFailure { attempts: 2, is_transient: true, .. }
        ));
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exchange_gives_up_after_dropped_connections() {
        let (base, accepted) = spawn_unreliable_server(usize::MAX, false).await;

        let client = LibbyClient::new(test_config(&base, 2)).unwrap();
        let err = exchange_setup_code(&client, "12345678").await.unwrap_err();
        assert!(matches!(
            err,
            LibbyError::NetworkFailure { attempts: 3, is_transient: true, .. }
        ));
        assert!(err.is_exchange_error());
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
        assert!(client.identity().await.is_none());
    }

    #[tokio::test]
    async fn test_exchange_against_server() {
        let (base, seen) = spawn_server(|_, request| match request_path(request) {
            "/chip?client=dewey" => (200, CHIP.to_string()),
            "/chip/clone/code" => (200, r#"{"result":"cloned"}"#.to_string()),
            "/chip/sync" => (200, SYNCED.to_string()),
            _ => (404, "{}".to_string()),
        })
        .await;

        let client = LibbyClient::new(test_config(&base, 0)).unwrap();
        let credential = exchange_setup_code(&client, "12345678").await.unwrap();
        assert_eq!(credential.identity_token.as_str(), "tok-123456");

        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(!requests[0].to_lowercase().contains("authorization:"));
        assert!(requests[1].to_lowercase().contains("authorization: bearer tok-123456"));
        assert!(requests[1].contains(r#""code":"12345678""#));
    }

    #[tokio::test]
    async fn test_exchange_rejected_code() {
        let (base, seen) = spawn_server(|_, request| match request_path(request) {
            "/chip?client=dewey" => (200, CHIP.to_string()),
            _ => (400, r#"{"result":"invalid_code"}"#.to_string()),
        })
        .await;

        let client = LibbyClient::new(test_config(&base, 2)).unwrap();
        let err = exchange_setup_code(&client, "00000000").await.unwrap_err();
        assert!(matches!(err, LibbyError::ExchangeRejected { .. }));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
