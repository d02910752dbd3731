//! SMTP AUTH verification against a configured credential pair.
//!
//! Supports PLAIN (RFC 4616) and LOGIN. Credential comparison is
//! constant-time.

use crate::error::{RelayError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use subtle::ConstantTimeEq;

/// Verifies AUTH PLAIN / LOGIN payloads against a single static
/// credential pair. With both fields empty, authentication is disabled.
#[derive(Debug, Clone)]
pub struct Authenticator {
    username: String,
    password: String,
}

impl Authenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// True if authentication credentials are configured.
    pub fn enabled(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Decode and verify an AUTH PLAIN response:
    /// `base64(authzid NUL authcid NUL password)`.
    pub fn verify_plain(&self, encoded: &str) -> Result<()> {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| RelayError::SmtpProtocol("invalid base64 encoding".to_string()))?;

        let decoded = String::from_utf8(decoded)
            .map_err(|_| RelayError::SmtpProtocol("invalid UTF-8 in credentials".to_string()))?;

        let parts: Vec<&str> = decoded.splitn(3, '\0').collect();
        if parts.len() != 3 {
            return Err(RelayError::SmtpProtocol(
                "invalid AUTH PLAIN format".to_string(),
            ));
        }

        // parts[0] is the authorization identity and is ignored.
        self.check(parts[1], parts[2])
    }

    /// Verify AUTH LOGIN credentials after the challenge-response flow.
    /// Both values arrive base64-encoded.
    pub fn verify_login(&self, encoded_user: &str, encoded_pass: &str) -> Result<()> {
        let user = BASE64
            .decode(encoded_user.trim())
            .map_err(|_| RelayError::SmtpProtocol("invalid base64 username".to_string()))?;
        let pass = BASE64
            .decode(encoded_pass.trim())
            .map_err(|_| RelayError::SmtpProtocol("invalid base64 password".to_string()))?;

        let user = String::from_utf8(user)
            .map_err(|_| RelayError::SmtpProtocol("invalid UTF-8 username".to_string()))?;
        let pass = String::from_utf8(pass)
            .map_err(|_| RelayError::SmtpProtocol("invalid UTF-8 password".to_string()))?;

        self.check(&user, &pass)
    }

    fn check(&self, username: &str, password: &str) -> Result<()> {
        let user_ok: bool = username
            .as_bytes()
            .ct_eq(self.username.as_bytes())
            .into();
        let pass_ok: bool = password
            .as_bytes()
            .ct_eq(self.password.as_bytes())
            .into();

        if user_ok && pass_ok {
            Ok(())
        } else {
            Err(RelayError::AuthenticationFailed)
        }
    }
}
