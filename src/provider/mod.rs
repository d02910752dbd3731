//! Email delivery backends.
//!
//! The set of backends is closed, so the contract is a tagged enum
//! rather than a trait object: stdout (always succeeds), Microsoft
//! Graph, and AWS SES v2.

pub mod graph;
pub mod ses;
pub mod stdout;

use crate::email::Email;
use crate::error::{RelayError, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use graph::GraphProvider;
pub use ses::SesProvider;
pub use stdout::StdoutProvider;

/// Initial delay for exponential retry backoff.
const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// An email delivery backend.
pub enum Provider {
    Stdout(StdoutProvider),
    Graph(GraphProvider),
    Ses(SesProvider),
    #[cfg(test)]
    Capture(testing::CaptureProvider),
}

impl Provider {
    /// Deliver a message through this provider. Internal retries are
    /// transparent; a single success or failure crosses this boundary.
    pub async fn send(&self, shutdown: &CancellationToken, msg: &Email) -> Result<()> {
        match self {
            Provider::Stdout(p) => p.send(msg),
            Provider::Graph(p) => p.send(shutdown, msg).await,
            Provider::Ses(p) => p.send(shutdown, msg).await,
            #[cfg(test)]
            Provider::Capture(p) => p.send(msg),
        }
    }

    /// Human-readable provider name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Stdout(_) => "stdout",
            Provider::Graph(_) => "msgraph",
            Provider::Ses(_) => "ses",
            #[cfg(test)]
            Provider::Capture(_) => "capture",
        }
    }
}

/// Exponential backoff delay for the given attempt index: 1s, 2s, 4s, ...
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    BASE_RETRY_DELAY * 2u32.saturating_pow(attempt.saturating_sub(1).min(16))
}

/// Sleep for the given duration, aborting early if the cancellation
/// token fires.
pub(crate) async fn sleep_with_cancel(
    shutdown: &CancellationToken,
    delay: Duration,
) -> Result<()> {
    tokio::select! {
        _ = shutdown.cancelled() => Err(RelayError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
