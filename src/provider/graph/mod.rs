//! Microsoft Graph delivery backend.
//!
//! Sends mail through the Graph `sendMail` endpoint using OAuth2 client
//! credentials, with response classification, exponential backoff,
//! Retry-After handling, and a one-shot token refresh on 401.

mod token;
mod types;

use crate::config::GraphConfig;
use crate::email::Email;
use crate::error::{RelayError, Result};
use crate::provider::{backoff_delay, sleep_with_cancel};
use std::fmt;
use std::time::Duration;
use token::TokenCache;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use types::{build_send_mail_request, GraphErrorResponse};

/// Maximum number of retry attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Timeout applied to every outbound HTTP request.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GraphProvider {
    graph_url: String,
    http: reqwest::Client,
    token: TokenCache,
}

impl GraphProvider {
    pub fn new(cfg: &GraphConfig) -> Result<Self> {
        let token_url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            cfg.tenant_id
        );
        let graph_url = format!(
            "https://graph.microsoft.com/v1.0/users/{}/sendMail",
            cfg.sender
        );

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| RelayError::Provider(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self::with_endpoints(cfg, graph_url, token_url, http))
    }

    /// Construct a provider with explicit endpoints, used by tests.
    fn with_endpoints(
        cfg: &GraphConfig,
        graph_url: String,
        token_url: String,
        http: reqwest::Client,
    ) -> Self {
        Self {
            graph_url,
            token: TokenCache::new(
                token_url,
                cfg.client_id.clone(),
                cfg.client_secret.clone(),
                http.clone(),
            ),
            http,
        }
    }

    /// Deliver a message via the Graph API, retrying transient failures
    /// with exponential backoff.
    pub async fn send(&self, shutdown: &CancellationToken, msg: &Email) -> Result<()> {
        let body = serde_json::to_vec(&build_send_mail_request(msg))?;

        let mut last_err: Option<SendError> = None;
        let mut token_refreshed = false;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                debug!(attempt, max_retries = MAX_RETRIES, "retrying Graph API request");
            }

            let err = match self.do_send_request(shutdown, &body).await {
                Ok(()) => return Ok(()),
                Err(Failure::Fatal(e)) => return Err(e),
                Err(Failure::Api(err)) => err,
            };

            if err.permanent {
                return Err(err.into());
            }

            if err.status_code == 401 {
                if token_refreshed {
                    // A second 401 after a fresh token is not recoverable.
                    return Err(err.into());
                }
                info!("refreshing Graph API token after 401");
                self.token
                    .force_refresh()
                    .await
                    .map_err(|e| RelayError::Token(format!("token refresh failed: {}", e)))?;
                token_refreshed = true;
                last_err = Some(err);
                continue;
            }

            if !err.transient {
                return Err(err.into());
            }

            if attempt < MAX_RETRIES {
                let delay = if err.status_code == 429 {
                    let delay = retry_after_delay(&err.retry_after, attempt + 1);
                    info!(retry_after = ?delay, "rate limited by Graph API");
                    delay
                } else {
                    let delay = backoff_delay(attempt + 1);
                    info!(status = err.status_code, delay = ?delay, "transient Graph API error, retrying");
                    delay
                };
                sleep_with_cancel(shutdown, delay)
                    .await
                    .map_err(|e| RelayError::Provider(format!("cancelled during retry wait: {}", e)))?;
            }
            last_err = Some(err);
        }

        let last = last_err.map(|e| e.to_string()).unwrap_or_default();
        Err(RelayError::Provider(format!(
            "Graph API request failed after {} retries: {}",
            MAX_RETRIES, last
        )))
    }

    /// Perform a single sendMail request.
    async fn do_send_request(
        &self,
        shutdown: &CancellationToken,
        body: &[u8],
    ) -> std::result::Result<(), Failure> {
        let token = self.token.acquire().await.map_err(Failure::Fatal)?;

        let request = self
            .http
            .post(&self.graph_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .bearer_auth(&token)
            .body(body.to_vec())
            .send();

        let response = tokio::select! {
            _ = shutdown.cancelled() => return Err(Failure::Fatal(RelayError::Cancelled)),
            r = request => r,
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                return Err(Failure::Api(SendError::transport(format!(
                    "HTTP request failed: {}",
                    e
                ))))
            }
        };

        let status = response.status().as_u16();
        if status == 200 || status == 202 {
            return Ok(());
        }

        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body_text = tokio::select! {
            _ = shutdown.cancelled() => return Err(Failure::Fatal(RelayError::Cancelled)),
            r = response.text() => r.unwrap_or_default(),
        };

        let message = serde_json::from_str::<GraphErrorResponse>(&body_text)
            .ok()
            .filter(|resp| !resp.error.message.is_empty())
            .map(|resp| resp.error.message)
            .unwrap_or(body_text);

        Err(Failure::Api(classify(status, message, retry_after)))
    }
}

/// A failed sendMail attempt: either a fatal condition that ends the
/// send, or a classified API error the retry loop can act on.
enum Failure {
    Fatal(RelayError),
    Api(SendError),
}

/// A Graph API error classified for retry decisions.
#[derive(Debug)]
struct SendError {
    message: String,
    status_code: u16,
    permanent: bool,
    transient: bool,
    retry_after: String,
}

impl SendError {
    fn transport(message: String) -> Self {
        Self {
            message,
            status_code: 0,
            permanent: false,
            transient: true,
            retry_after: String::new(),
        }
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Graph API error (HTTP {}): {}",
            self.status_code, self.message
        )
    }
}

impl From<SendError> for RelayError {
    fn from(err: SendError) -> Self {
        RelayError::Provider(err.to_string())
    }
}

/// Categorise an HTTP error response for retry decisions.
fn classify(status_code: u16, message: String, retry_after: String) -> SendError {
    let mut err = SendError {
        message,
        status_code,
        permanent: false,
        transient: false,
        retry_after,
    };

    match status_code {
        400 | 403 => err.permanent = true,
        401 | 429 => err.transient = true,
        code if code >= 500 => err.transient = true,
        _ => err.permanent = true,
    }

    err
}

/// Delay derived from a Retry-After header value, falling back to
/// exponential backoff when the header is missing or unparseable.
fn retry_after_delay(retry_after: &str, attempt: u32) -> Duration {
    match retry_after.parse::<u64>() {
        Ok(seconds) if seconds > 0 => Duration::from_secs(seconds),
        _ => backoff_delay(attempt),
    }
}
