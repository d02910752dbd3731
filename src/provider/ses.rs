//! AWS SES v2 delivery backend.
//!
//! Messages without attachments use the SES simple email format;
//! messages with attachments are serialised into a raw multipart/mixed
//! MIME message. Errors from the API are treated as transient and
//! retried blindly with exponential backoff.

use crate::config::SesConfig;
use crate::email::Email;
use crate::error::{RelayError, Result};
use crate::provider::{backoff_delay, sleep_with_cancel};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Maximum number of retry attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// The SES SendEmail operation, narrowed to what the provider needs so
/// tests can substitute a mock for the AWS SDK client.
#[async_trait]
pub trait SendEmailApi: Send + Sync {
    async fn send_email(&self, from: &str, request: &SesRequest) -> std::result::Result<(), String>;
}

/// An outbound SES request, either structured or raw MIME.
#[derive(Debug, Clone)]
pub enum SesRequest {
    Simple(SimpleRequest),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
pub struct SimpleRequest {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

pub struct SesProvider {
    sender: String,
    client: Box<dyn SendEmailApi>,
}

impl SesProvider {
    /// Create a provider backed by the real AWS SES v2 client. Static
    /// credentials are used when both key fields are configured,
    /// otherwise the default AWS credential chain applies.
    pub async fn new(cfg: &SesConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_sesv2::config::Region::new(cfg.region.clone()));

        if !cfg.access_key_id.is_empty() && !cfg.secret_access_key.is_empty() {
            loader = loader.credentials_provider(aws_sdk_sesv2::config::Credentials::new(
                cfg.access_key_id.clone(),
                cfg.secret_access_key.clone(),
                None,
                None,
                "static",
            ));
        }

        let aws_cfg = loader.load().await;
        let client = aws_sdk_sesv2::Client::new(&aws_cfg);

        Ok(Self {
            sender: cfg.sender.clone(),
            client: Box::new(SesApiClient { client }),
        })
    }

    /// Create a provider with a custom API client, used for testing.
    pub fn with_client(sender: impl Into<String>, client: Box<dyn SendEmailApi>) -> Self {
        Self {
            sender: sender.into(),
            client,
        }
    }

    /// Deliver a message via SES, retrying any failure with exponential
    /// backoff.
    pub async fn send(&self, shutdown: &CancellationToken, msg: &Email) -> Result<()> {
        let request = if msg.has_attachments() {
            SesRequest::Raw(build_raw_message(&self.sender, msg))
        } else {
            SesRequest::Simple(build_simple_request(msg))
        };

        let mut last_err = String::new();

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                debug!(attempt, max_retries = MAX_RETRIES, "retrying SES API request");
                sleep_with_cancel(shutdown, backoff_delay(attempt))
                    .await
                    .map_err(|e| {
                        RelayError::Provider(format!("cancelled during retry wait: {}", e))
                    })?;
            }

            let result = tokio::select! {
                _ = shutdown.cancelled() => return Err(RelayError::Cancelled),
                r = self.client.send_email(&self.sender, &request) => r,
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "SES API error");
                    last_err = e;
                }
            }
        }

        Err(RelayError::Provider(format!(
            "SES API request failed after {} retries: {}",
            MAX_RETRIES, last_err
        )))
    }
}

/// Build a simple-format request for a message without attachments.
fn build_simple_request(msg: &Email) -> SimpleRequest {
    SimpleRequest {
        to: msg.to.clone(),
        cc: msg.cc.clone(),
        bcc: msg.bcc.clone(),
        subject: msg.subject.clone(),
        text: (!msg.text_body.is_empty()).then(|| msg.text_body.clone()),
        html: (!msg.html_body.is_empty()).then(|| msg.html_body.clone()),
    }
}

/// Construct a raw RFC 5322 message for emails with attachments.
fn build_raw_message(sender: &str, msg: &Email) -> Vec<u8> {
    let boundary = random_boundary();
    let mut out = String::new();

    out.push_str(&format!("From: {}\r\n", sender));
    if !msg.to.is_empty() {
        out.push_str(&format!("To: {}\r\n", msg.to.join(", ")));
    }
    if !msg.cc.is_empty() {
        out.push_str(&format!("Cc: {}\r\n", msg.cc.join(", ")));
    }
    out.push_str(&format!("Subject: {}\r\n", msg.subject));
    if !msg.message_id.is_empty() {
        out.push_str(&format!("Message-ID: {}\r\n", msg.message_id));
    }
    out.push_str("MIME-Version: 1.0\r\n");
    out.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
        boundary
    ));

    // Body part: HTML wins when present.
    if !msg.html_body.is_empty() {
        out.push_str(&format!("--{}\r\n", boundary));
        out.push_str("Content-Type: text/html; charset=UTF-8\r\n\r\n");
        out.push_str(&msg.html_body);
        out.push_str("\r\n");
    } else if !msg.text_body.is_empty() {
        out.push_str(&format!("--{}\r\n", boundary));
        out.push_str("Content-Type: text/plain; charset=UTF-8\r\n\r\n");
        out.push_str(&msg.text_body);
        out.push_str("\r\n");
    }

    for att in &msg.attachments {
        out.push_str(&format!("--{}\r\n", boundary));
        out.push_str(&format!("Content-Type: {}\r\n", att.content_type));
        out.push_str("Content-Transfer-Encoding: base64\r\n");
        out.push_str(&format!(
            "Content-Disposition: attachment; filename={}\r\n\r\n",
            q_encode(&att.filename)
        ));
        out.push_str(&encode_base64_with_line_breaks(&att.content));
        out.push_str("\r\n");
    }

    out.push_str(&format!("--{}--\r\n", boundary));
    out.into_bytes()
}

/// Fresh random multipart boundary: 60 hex characters.
fn random_boundary() -> String {
    let mut bytes = [0u8; 30];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Base64 with CRLF line breaks every 76 characters per RFC 2045.
fn encode_base64_with_line_breaks(data: &[u8]) -> String {
    let encoded = BASE64.encode(data);
    encoded
        .as_bytes()
        .chunks(76)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// RFC 2047 Q-encode a filename when it contains non-ASCII or special
/// characters; plain ASCII names pass through unchanged.
fn q_encode(value: &str) -> String {
    let needs_encoding = value
        .bytes()
        .any(|b| !(0x21..=0x7e).contains(&b) || matches!(b, b'=' | b'?' | b'_' | b'"'));
    if !needs_encoding {
        return value.to_string();
    }

    let mut encoded = String::from("=?utf-8?q?");
    for b in value.bytes() {
        match b {
            b' ' => encoded.push('_'),
            b'=' | b'?' | b'_' | b'"' => encoded.push_str(&format!("={:02X}", b)),
            0x21..=0x7e => encoded.push(b as char),
            _ => encoded.push_str(&format!("={:02X}", b)),
        }
    }
    encoded.push_str("?=");
    encoded
}

/// Real SES v2 client behind the [`SendEmailApi`] seam.
struct SesApiClient {
    client: aws_sdk_sesv2::Client,
}

#[async_trait]
impl SendEmailApi for SesApiClient {
    async fn send_email(&self, from: &str, request: &SesRequest) -> std::result::Result<(), String> {
        use aws_sdk_sesv2::primitives::Blob;
        use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message, RawMessage};

        let utf8_content = |data: &str| {
            Content::builder()
                .data(data)
                .charset("UTF-8")
                .build()
                .map_err(|e| format!("failed to build content: {}", e))
        };

        match request {
            SesRequest::Simple(simple) => {
                let mut body = Body::builder();
                if let Some(html) = &simple.html {
                    body = body.html(utf8_content(html)?);
                }
                if let Some(text) = &simple.text {
                    body = body.text(utf8_content(text)?);
                }

                let message = Message::builder()
                    .subject(utf8_content(&simple.subject)?)
                    .body(body.build())
                    .build();

                let destination = Destination::builder()
                    .set_to_addresses(Some(simple.to.clone()))
                    .set_cc_addresses(Some(simple.cc.clone()))
                    .set_bcc_addresses(Some(simple.bcc.clone()))
                    .build();

                self.client
                    .send_email()
                    .from_email_address(from)
                    .destination(destination)
                    .content(EmailContent::builder().simple(message).build())
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            SesRequest::Raw(raw) => {
                let raw_message = RawMessage::builder()
                    .data(Blob::new(raw.clone()))
                    .build()
                    .map_err(|e| format!("failed to build raw message: {}", e))?;

                self.client
                    .send_email()
                    .from_email_address(from)
                    .content(EmailContent::builder().raw(raw_message).build())
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
        }
    }
}
