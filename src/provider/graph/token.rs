//! OAuth2 client-credentials token cache.
//!
//! The cache is shared by all concurrent Graph sends. The mutex is held
//! across the refresh request, which coalesces concurrent first-time
//! acquisitions into a single token-endpoint call.

use super::types::TokenResponse;
use crate::error::{RelayError, Result};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Margin before actual expiry at which a token counts as expired, so a
/// token cannot expire mid-request.
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(5 * 60);

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

pub(crate) struct TokenCache {
    state: Mutex<TokenState>,
    token_url: String,
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
}

#[derive(Default)]
struct TokenState {
    access_token: String,
    expires_at: Option<Instant>,
}

impl TokenCache {
    pub(crate) fn new(
        token_url: String,
        client_id: String,
        client_secret: String,
        http: reqwest::Client,
    ) -> Self {
        Self {
            state: Mutex::new(TokenState::default()),
            token_url,
            client_id,
            client_secret,
            http,
        }
    }

    /// Return a valid access token, refreshing it if necessary.
    pub(crate) async fn acquire(&self) -> Result<String> {
        let mut state = self.state.lock().await;

        if !state.access_token.is_empty() {
            if let Some(expires_at) = state.expires_at {
                if Instant::now() < expires_at {
                    return Ok(state.access_token.clone());
                }
            }
        }

        self.refresh(&mut state).await
    }

    /// Discard the current token and acquire a new one. Used when a 401
    /// response indicates the cached token is invalid.
    pub(crate) async fn force_refresh(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        state.access_token.clear();
        state.expires_at = None;
        self.refresh(&mut state).await
    }

    /// Fetch a new token from the OAuth2 endpoint. The caller holds the
    /// state lock.
    async fn refresh(&self, state: &mut TokenState) -> Result<String> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", GRAPH_SCOPE),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| RelayError::Token(format!("token request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::Token(format!("failed to read token response: {}", e)))?;

        if status != reqwest::StatusCode::OK {
            return Err(RelayError::Token(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| RelayError::Token(format!("failed to parse token response: {}", e)))?;

        if token.access_token.is_empty() {
            return Err(RelayError::Token(
                "token response missing access_token".to_string(),
            ));
        }

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_BUFFER);
        state.access_token = token.access_token;
        state.expires_at = Some(Instant::now() + lifetime);

        Ok(state.access_token.clone())
    }
}
