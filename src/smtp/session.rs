//! Per-connection ESMTP state machine.
//!
//! A session owns its connection and transaction state exclusively. It
//! reads CRLF-terminated command lines under a 60-second idle timeout,
//! walks the EHLO/STARTTLS/AUTH/MAIL/RCPT/DATA state machine, and hands
//! completed messages to the configured delivery provider. The shutdown
//! token is observed between commands and inside every suspending call.

use crate::error::{RelayError, Result};
use crate::mime;
use crate::provider::Provider;
use crate::security::Authenticator;
use crate::smtp::commands::{parse_mail_argument, parse_rcpt_argument, SmtpCommand};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Maximum time a session may sit idle on any single read.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Unified stream type for plain and TLS connections, so STARTTLS can
/// upgrade the transport mid-session behind one interface.
enum SmtpStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    /// Placeholder while STARTTLS swaps the transport; never observable
    /// by I/O.
    Upgrading,
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            SmtpStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            SmtpStream::Upgrading => panic!("I/O on SmtpStream during STARTTLS upgrade"),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            SmtpStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            SmtpStream::Upgrading => panic!("I/O on SmtpStream during STARTTLS upgrade"),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            SmtpStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            SmtpStream::Upgrading => panic!("I/O on SmtpStream during STARTTLS upgrade"),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            SmtpStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            SmtpStream::Upgrading => panic!("I/O on SmtpStream during STARTTLS upgrade"),
        }
    }
}

/// Session states in protocol order, so gate checks are ordered
/// comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SessionState {
    Connected,
    Greeted,
    AuthOk,
    MailFrom,
    RcptTo,
    Data,
    Done,
}

enum Flow {
    Continue,
    Quit,
}

pub struct Session {
    reader: BufReader<SmtpStream>,
    state: SessionState,
    auth: Arc<Authenticator>,
    provider: Arc<Provider>,
    hostname: String,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    tls_active: bool,
    max_message_size: usize,

    // Current transaction
    mail_from: String,
    rcpt_to: Vec<String>,
}

impl Session {
    pub fn new(
        stream: TcpStream,
        auth: Arc<Authenticator>,
        provider: Arc<Provider>,
        hostname: String,
        tls_config: Option<Arc<rustls::ServerConfig>>,
        max_message_size: usize,
    ) -> Self {
        Self {
            reader: BufReader::new(SmtpStream::Plain(stream)),
            state: SessionState::Connected,
            auth,
            provider,
            hostname,
            tls_config,
            tls_active: false,
            max_message_size,
            mail_from: String::new(),
            rcpt_to: Vec::new(),
        }
    }

    /// Run the session until the client disconnects, the idle timeout
    /// fires, or the shutdown token is cancelled. I/O failures end the
    /// session silently.
    pub async fn run(mut self, shutdown: CancellationToken) {
        if let Err(e) = self.run_inner(&shutdown).await {
            debug!(error = %e, "session ended");
        }
    }

    async fn run_inner(&mut self, shutdown: &CancellationToken) -> Result<()> {
        self.write_line(&format!("220 {} ESMTP relay-rs", self.hostname))
            .await?;

        let mut line = String::new();
        loop {
            line.clear();

            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                r = timeout(IDLE_TIMEOUT, self.reader.read_line(&mut line)) => Some(r),
            };

            let Some(read) = read else {
                self.write_line("421 Service shutting down").await?;
                return Ok(());
            };

            let n = match read {
                Ok(result) => result?,
                Err(_) => {
                    debug!("idle timeout, closing session");
                    return Ok(());
                }
            };
            if n == 0 {
                debug!("client disconnected");
                return Ok(());
            }

            let trimmed = line.trim_end_matches(|c| c == '\r' || c == '\n').to_string();
            if trimmed.is_empty() {
                continue;
            }

            debug!(line = %trimmed, "received command");
            match self
                .handle_command(shutdown, SmtpCommand::parse(&trimmed))
                .await?
            {
                Flow::Continue => {}
                Flow::Quit => return Ok(()),
            }
        }
    }

    async fn handle_command(
        &mut self,
        shutdown: &CancellationToken,
        cmd: SmtpCommand,
    ) -> Result<Flow> {
        match cmd {
            SmtpCommand::Helo(arg) => self.handle_helo(&arg).await?,
            SmtpCommand::Ehlo(arg) => self.handle_ehlo(&arg).await?,
            SmtpCommand::Starttls => self.handle_starttls().await?,
            SmtpCommand::Auth(arg) => self.handle_auth(&arg).await?,
            SmtpCommand::Mail(arg) => self.handle_mail(&arg).await?,
            SmtpCommand::Rcpt(arg) => self.handle_rcpt(&arg).await?,
            SmtpCommand::Data => self.handle_data(shutdown).await?,
            SmtpCommand::Rset => {
                self.reset_transaction();
                self.write_line("250 OK").await?;
            }
            SmtpCommand::Noop => self.write_line("250 OK").await?,
            SmtpCommand::Quit => {
                self.state = SessionState::Done;
                self.write_line("221 Bye").await?;
                return Ok(Flow::Quit);
            }
            SmtpCommand::Unknown(verb) => {
                debug!(verb = %verb, "unrecognized command");
                self.write_line("500 Unrecognized command").await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_helo(&mut self, arg: &str) -> Result<()> {
        if arg.is_empty() {
            return self.write_line("501 Syntax: HELO hostname").await;
        }
        info!(client = %arg, "HELO");
        self.state = SessionState::Greeted;
        self.write_line(&format!("250 {} Hello {}", self.hostname, arg))
            .await
    }

    async fn handle_ehlo(&mut self, arg: &str) -> Result<()> {
        if arg.is_empty() {
            return self.write_line("501 Syntax: EHLO hostname").await;
        }
        info!(client = %arg, "EHLO");
        self.state = SessionState::Greeted;

        self.write_line(&format!("250-{} Hello {}", self.hostname, arg))
            .await?;
        if self.tls_config.is_some() && !self.tls_active {
            self.write_line("250-STARTTLS").await?;
        }
        if self.auth.enabled() {
            self.write_line("250-AUTH PLAIN LOGIN").await?;
        }
        self.write_line(&format!("250-SIZE {}", self.max_message_size))
            .await?;
        self.write_line("250 OK").await
    }

    /// Upgrade the connection to TLS. Only legal in the greeted state
    /// with TLS configured and not already active.
    async fn handle_starttls(&mut self) -> Result<()> {
        let tls_config = match &self.tls_config {
            Some(config) if !self.tls_active && self.state == SessionState::Greeted => {
                config.clone()
            }
            _ => return self.write_line("503 Bad sequence of commands").await,
        };

        self.write_line("220 Ready to start TLS").await?;

        let inner =
            std::mem::replace(&mut self.reader, BufReader::new(SmtpStream::Upgrading)).into_inner();
        let SmtpStream::Plain(tcp) = inner else {
            error!("stream already upgraded despite tls_active=false");
            return Err(RelayError::SmtpProtocol(
                "stream state mismatch during STARTTLS".to_string(),
            ));
        };

        let acceptor = TlsAcceptor::from(tls_config);
        let tls_stream = match timeout(IDLE_TIMEOUT, acceptor.accept(tcp)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!(error = %e, "TLS handshake failed");
                return Err(e.into());
            }
            Err(_) => {
                warn!("TLS handshake timed out");
                return Err(RelayError::SmtpProtocol("TLS handshake timeout".to_string()));
            }
        };

        // Fresh buffered reader over the encrypted stream; the client
        // must greet again and authentication state is dropped.
        self.reader = BufReader::new(SmtpStream::Tls(Box::new(tls_stream)));
        self.tls_active = true;
        self.state = SessionState::Connected;
        info!("TLS established");
        Ok(())
    }

    async fn handle_auth(&mut self, arg: &str) -> Result<()> {
        if self.state < SessionState::Greeted {
            return self.write_line("503 Send EHLO/HELO first").await;
        }
        if !self.auth.enabled() {
            return self.write_line("503 AUTH not available").await;
        }

        let mut parts = arg.splitn(2, ' ');
        let mechanism = parts.next().unwrap_or_default().to_uppercase();
        let initial = parts.next().unwrap_or_default().trim().to_string();

        match mechanism.as_str() {
            "PLAIN" => self.handle_auth_plain(initial).await,
            "LOGIN" => self.handle_auth_login().await,
            _ => {
                self.write_line("504 Unrecognized authentication type")
                    .await
            }
        }
    }

    async fn handle_auth_plain(&mut self, initial: String) -> Result<()> {
        let encoded = if initial.is_empty() {
            self.write_line("334").await?;
            self.read_challenge_line().await?
        } else {
            initial
        };

        if encoded == "*" {
            return self.write_line("501 Authentication cancelled").await;
        }

        match self.auth.verify_plain(&encoded) {
            Ok(()) => {
                info!("authentication successful");
                self.state = SessionState::AuthOk;
                self.write_line("235 Authentication successful").await
            }
            Err(e) => {
                warn!(error = %e, "authentication failed");
                self.write_line("535 Authentication failed").await
            }
        }
    }

    async fn handle_auth_login(&mut self) -> Result<()> {
        // Base64 challenges for "Username:" and "Password:".
        self.write_line("334 VXNlcm5hbWU6").await?;
        let encoded_user = self.read_challenge_line().await?;
        if encoded_user == "*" {
            return self.write_line("501 Authentication cancelled").await;
        }

        self.write_line("334 UGFzc3dvcmQ6").await?;
        let encoded_pass = self.read_challenge_line().await?;
        if encoded_pass == "*" {
            return self.write_line("501 Authentication cancelled").await;
        }

        match self.auth.verify_login(&encoded_user, &encoded_pass) {
            Ok(()) => {
                info!("authentication successful");
                self.state = SessionState::AuthOk;
                self.write_line("235 Authentication successful").await
            }
            Err(e) => {
                warn!(error = %e, "authentication failed");
                self.write_line("535 Authentication failed").await
            }
        }
    }

    async fn read_challenge_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = timeout(IDLE_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .map_err(|_| RelayError::SmtpProtocol("timed out waiting for AUTH response".to_string()))??;
        if n == 0 {
            return Err(RelayError::SmtpProtocol(
                "connection closed during AUTH".to_string(),
            ));
        }
        Ok(line.trim_end_matches(|c| c == '\r' || c == '\n').to_string())
    }

    async fn handle_mail(&mut self, arg: &str) -> Result<()> {
        if self.state < SessionState::Greeted {
            return self.write_line("503 Send EHLO/HELO first").await;
        }
        if self.auth.enabled() && self.state < SessionState::AuthOk {
            warn!("MAIL FROM rejected: authentication required");
            return self.write_line("530 Authentication required").await;
        }

        match parse_mail_argument(arg) {
            Some(addr) => {
                info!(from = %addr, "MAIL FROM");
                self.mail_from = addr;
                self.rcpt_to.clear();
                self.state = SessionState::MailFrom;
                self.write_line("250 OK").await
            }
            None => self.write_line("501 Syntax: MAIL FROM:<address>").await,
        }
    }

    async fn handle_rcpt(&mut self, arg: &str) -> Result<()> {
        if self.state < SessionState::MailFrom {
            return self.write_line("503 Send MAIL FROM first").await;
        }

        match parse_rcpt_argument(arg) {
            Some(addr) => {
                info!(to = %addr, "RCPT TO");
                self.rcpt_to.push(addr);
                self.state = SessionState::RcptTo;
                self.write_line("250 OK").await
            }
            None => self.write_line("501 Syntax: RCPT TO:<address>").await,
        }
    }

    async fn handle_data(&mut self, shutdown: &CancellationToken) -> Result<()> {
        if self.state < SessionState::RcptTo {
            return self.write_line("503 Send RCPT TO first").await;
        }

        self.write_line("354 Start mail input; end with <CRLF>.<CRLF>")
            .await?;
        self.state = SessionState::Data;

        let mut buffer: Vec<u8> = Vec::new();
        let mut oversized = false;
        let mut line: Vec<u8> = Vec::new();

        loop {
            line.clear();
            let n = timeout(IDLE_TIMEOUT, self.reader.read_until(b'\n', &mut line))
                .await
                .map_err(|_| RelayError::SmtpProtocol("timed out reading DATA".to_string()))??;
            if n == 0 {
                return Err(RelayError::SmtpProtocol(
                    "connection closed during DATA".to_string(),
                ));
            }

            let trimmed = trim_crlf(&line);
            if trimmed == b"." {
                break;
            }

            // Dot-unstuffing: a leading ".." loses its first dot.
            let stored: &[u8] = if trimmed.starts_with(b"..") {
                &line[1..]
            } else {
                &line
            };

            // Past the size cap the remainder of the stream is drained
            // so the terminator still resynchronises the protocol.
            if oversized {
                continue;
            }
            if buffer.len() + stored.len() > self.max_message_size {
                oversized = true;
                continue;
            }
            buffer.extend_from_slice(stored);
        }

        if oversized {
            warn!(max = self.max_message_size, "message exceeds size limit");
            self.write_line("552 Message size exceeds maximum").await?;
            self.reset_transaction();
            return Ok(());
        }

        let mut msg = match mime::parse(&buffer) {
            Ok(msg) => msg,
            Err(e) => {
                error!(error = %e, "failed to parse message");
                self.write_line("550 Failed to process message").await?;
                self.reset_transaction();
                return Ok(());
            }
        };

        // Fill missing header addresses from the envelope.
        if msg.from.is_empty() {
            msg.from = self.mail_from.clone();
        }
        if msg.to.is_empty() {
            msg.to = self.rcpt_to.clone();
        }

        if let Err(e) = self.provider.send(shutdown, &msg).await {
            error!(provider = self.provider.name(), error = %e, "provider send failed");
            self.write_line("451 Temporary failure, please try again later")
                .await?;
            self.reset_transaction();
            return Ok(());
        }

        self.write_line("250 OK message queued").await?;
        self.reset_transaction();
        Ok(())
    }

    /// Clear the mail transaction without touching greeting or
    /// authentication state.
    fn reset_transaction(&mut self) {
        self.mail_from.clear();
        self.rcpt_to.clear();

        if self.auth.enabled() && self.state >= SessionState::AuthOk {
            self.state = SessionState::AuthOk;
        } else if self.state >= SessionState::Greeted {
            self.state = SessionState::Greeted;
        }
    }

    /// Write one reply line followed by CRLF and flush. A write error
    /// aborts the session.
    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.reader.write_all(line.as_bytes()).await?;
        self.reader.write_all(b"\r\n").await?;
        self.reader.flush().await?;
        Ok(())
    }
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}
