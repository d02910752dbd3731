use anyhow::Context;
use clap::Parser;
use relay_rs::config::Config;
use relay_rs::provider::{GraphProvider, Provider, SesProvider, StdoutProvider};
use relay_rs::security;
use relay_rs::smtp::{Server, ServerConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "relay-rs", about = "Receive-only ESMTP relay")]
struct Args {
    /// Path to a YAML configuration file (optional; environment
    /// variables always override).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_file(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    setup_logging(&config.logging.level)?;

    let tls_config = security::load_or_generate(&config.tls.cert_file, &config.tls.key_file)
        .context("failed to set up TLS")?;
    let tls_mode = if config.tls.cert_file.is_empty() {
        "self-signed"
    } else {
        "file"
    };

    let provider = Arc::new(select_provider(&config).await?);

    info!(
        listen = %config.smtp.listen,
        provider = provider.name(),
        auth_enabled = config.auth_enabled(),
        tls_mode,
        "starting relay-rs"
    );

    let server = Server::new(ServerConfig {
        listen_addr: config.smtp.listen.clone(),
        hostname: "localhost".to_string(),
        provider,
        tls_config: Some(tls_config),
        auth_username: config.smtp.username.clone(),
        auth_password: config.smtp.password.clone(),
        max_message_size: config.smtp.max_message_size,
    });

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    server.listen_and_serve(shutdown).await?;
    info!("relay-rs stopped");
    Ok(())
}

/// Choose the delivery backend. An explicit `provider` value is
/// validated; an empty value auto-detects Graph, then SES, then stdout.
async fn select_provider(config: &Config) -> anyhow::Result<Provider> {
    match config.provider.as_str() {
        "graph" => {
            anyhow::ensure!(
                config.graph_configured(),
                "graph provider selected but GRAPH_TENANT_ID, GRAPH_CLIENT_ID, \
                 GRAPH_CLIENT_SECRET and GRAPH_SENDER are required"
            );
            info!(sender = %config.graph.sender, "using Microsoft Graph provider");
            Ok(Provider::Graph(GraphProvider::new(&config.graph)?))
        }
        "ses" => {
            anyhow::ensure!(
                config.ses_configured(),
                "ses provider selected but SES_REGION and SES_SENDER are required"
            );
            info!(region = %config.ses.region, sender = %config.ses.sender, "using AWS SES provider");
            Ok(Provider::Ses(SesProvider::new(&config.ses).await?))
        }
        "stdout" => {
            info!("using stdout provider");
            Ok(Provider::Stdout(StdoutProvider::new()))
        }
        "" => {
            if config.graph_configured() {
                info!(sender = %config.graph.sender, "using Microsoft Graph provider (auto-detected)");
                return Ok(Provider::Graph(GraphProvider::new(&config.graph)?));
            }
            if config.ses_configured() {
                info!(region = %config.ses.region, sender = %config.ses.sender, "using AWS SES provider (auto-detected)");
                return Ok(Provider::Ses(SesProvider::new(&config.ses).await?));
            }
            info!("no provider configured, using stdout provider");
            Ok(Provider::Stdout(StdoutProvider::new()))
        }
        other => anyhow::bail!("unknown provider: {}", other),
    }
}

fn setup_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;
    Ok(())
}

/// Cancel the shutdown token on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, initiating shutdown"),
            _ = sigterm.recv() => info!("received SIGTERM, initiating shutdown"),
        }
        shutdown.cancel();
    });
}
