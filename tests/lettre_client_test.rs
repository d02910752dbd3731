//! Interoperability tests with a real SMTP client library.

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use relay_rs::provider::{Provider, StdoutProvider};
use relay_rs::smtp::{Server, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn start_server(auth_username: &str, auth_password: &str) -> (String, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Server::new(ServerConfig {
        listen_addr: addr.to_string(),
        hostname: "relay.test".to_string(),
        provider: Arc::new(Provider::Stdout(StdoutProvider::new())),
        tls_config: None,
        auth_username: auth_username.to_string(),
        auth_password: auth_password.to_string(),
        max_message_size: 26_214_400,
    });

    tokio::spawn(async move {
        server
            .serve_with_listener(listener, CancellationToken::new())
            .await
    });

    (addr.ip().to_string(), addr.port())
}

#[tokio::test]
async fn test_lettre_send_without_auth() {
    let (host, port) = start_server("", "").await;

    let result = tokio::task::spawn_blocking(move || {
        let email = Message::builder()
            .from("Sender <sender@example.com>".parse().unwrap())
            .to("Recipient <recipient@example.com>".parse().unwrap())
            .subject("Lettre interop")
            .header(ContentType::TEXT_PLAIN)
            .body("Sent through a real SMTP client.".to_string())
            .expect("failed to build email");

        let mailer = SmtpTransport::builder_dangerous(&host)
            .port(port)
            .timeout(Some(Duration::from_secs(5)))
            .build();

        mailer.send(&email)
    })
    .await
    .unwrap();

    assert!(result.is_ok(), "send failed: {:?}", result.err());
}

#[tokio::test]
async fn test_lettre_send_with_auth() {
    let (host, port) = start_server("relay", "secret").await;

    let result = tokio::task::spawn_blocking(move || {
        let email = Message::builder()
            .from("sender@example.com".parse().unwrap())
            .to("recipient@example.com".parse().unwrap())
            .subject("Authenticated send")
            .header(ContentType::TEXT_PLAIN)
            .body("With credentials.".to_string())
            .expect("failed to build email");

        let mailer = SmtpTransport::builder_dangerous(&host)
            .port(port)
            .credentials(Credentials::new("relay".to_string(), "secret".to_string()))
            .timeout(Some(Duration::from_secs(5)))
            .build();

        mailer.send(&email)
    })
    .await
    .unwrap();

    assert!(result.is_ok(), "send failed: {:?}", result.err());
}

#[tokio::test]
async fn test_lettre_invalid_credentials() {
    let (host, port) = start_server("relay", "secret").await;

    let result = tokio::task::spawn_blocking(move || {
        let email = Message::builder()
            .from("sender@example.com".parse().unwrap())
            .to("recipient@example.com".parse().unwrap())
            .subject("Should fail")
            .body("Wrong password.".to_string())
            .expect("failed to build email");

        let mailer = SmtpTransport::builder_dangerous(&host)
            .port(port)
            .credentials(Credentials::new(
                "relay".to_string(),
                "wrongpassword".to_string(),
            ))
            .timeout(Some(Duration::from_secs(5)))
            .build();

        mailer.send(&email)
    })
    .await
    .unwrap();

    assert!(result.is_err(), "send with bad credentials should fail");
}
