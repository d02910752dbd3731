//! SMTP listener / acceptor.
//!
//! Accepts connections and spawns one session task per connection. On
//! shutdown it stops accepting and waits up to 30 seconds for in-flight
//! sessions to complete.

use crate::error::Result;
use crate::provider::Provider;
use crate::security::Authenticator;
use crate::smtp::session::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Maximum time to wait for in-flight sessions during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServerConfig {
    /// Address to listen on, e.g. `0.0.0.0:2525`.
    pub listen_addr: String,
    /// Hostname used in the banner and EHLO responses.
    pub hostname: String,
    /// Delivery backend shared by all sessions.
    pub provider: Arc<Provider>,
    /// TLS material for STARTTLS; None disables the capability.
    pub tls_config: Option<Arc<rustls::ServerConfig>>,
    pub auth_username: String,
    pub auth_password: String,
    pub max_message_size: usize,
}

pub struct Server {
    config: ServerConfig,
    auth: Arc<Authenticator>,
}

impl Server {
    pub fn new(mut config: ServerConfig) -> Self {
        if config.hostname.is_empty() {
            config.hostname = "localhost".to_string();
        }
        let auth = Arc::new(Authenticator::new(
            config.auth_username.clone(),
            config.auth_password.clone(),
        ));
        Self { config, auth }
    }

    /// Bind the configured address and serve until the shutdown token is
    /// cancelled.
    pub async fn listen_and_serve(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        self.serve_with_listener(listener, shutdown).await
    }

    /// Serve connections from an already-bound listener. Split out so
    /// tests can bind an ephemeral port themselves.
    pub async fn serve_with_listener(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!(
            addr = %listener.local_addr()?,
            provider = self.config.provider.name(),
            auth_enabled = self.auth.enabled(),
            tls_enabled = self.config.tls_config.is_some(),
            "SMTP server listening"
        );

        let tracker = TaskTracker::new();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutting down SMTP server");
                    break;
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer)) => {
                    debug!(peer = %peer, "accepted connection");
                    let session = Session::new(
                        socket,
                        self.auth.clone(),
                        self.config.provider.clone(),
                        self.config.hostname.clone(),
                        self.config.tls_config.clone(),
                        self.config.max_message_size,
                    );
                    tracker.spawn(session.run(shutdown.clone()));
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }

        tracker.close();
        if timeout(SHUTDOWN_TIMEOUT, tracker.wait()).await.is_err() {
            warn!("shutdown timeout reached, closing anyway");
        } else {
            info!("all sessions completed");
        }

        Ok(())
    }
}
