//! Remote agent surface: the capabilities the scheduler needs from it.
//!
//! The browser plumbing lives behind two traits so the scheduling and
//! synchronization logic never touch the protocol:
//! - [`TranscriptSource`]: read the latest turn and ask about markers
//! - [`RemoteAgent`]: a live session that can also take input
//!
//! [`cdp::CdpConnector`] is the Chrome DevTools Protocol implementation.

pub mod cdp;
pub mod markers;

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::util::sleep_or_cancel;
use crate::{qlog, qlog_debug, qlog_warn, Error, Result};

pub use markers::{MarkerKind, MarkerSet};

/// Read side of the remote surface.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Best-effort text of the agent's latest turn, `None` if nothing is
    /// extractable yet.
    async fn read_latest(&self) -> Result<Option<String>>;

    /// Whether a marker of the given kind is currently visible.
    async fn has_marker(&self, kind: MarkerKind) -> Result<bool>;
}

/// One live session with the remote agent.
#[async_trait]
pub trait RemoteAgent: TranscriptSource {
    /// Start a fresh conversation context.
    async fn new_conversation(&self) -> Result<()>;

    /// Deliver instruction text to the input surface and send it.
    async fn submit(&self, instruction: &str) -> Result<()>;

    /// Ask the agent to stop the turn in progress. Best-effort.
    async fn cancel_turn(&self);

    /// Release the session. Best-effort, never fails.
    async fn disconnect(&mut self);
}

/// Opens sessions against an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn RemoteAgent>>;
}

/// Submit an instruction, optionally in a fresh conversation.
///
/// Failing to open a fresh conversation is expected on some surfaces; the
/// current conversation is reused instead. Returns the transcript as it read
/// just before submitting, the baseline the synchronizer must see change.
pub async fn submit_instruction(
    agent: &dyn RemoteAgent,
    instruction: &str,
    fresh_conversation: bool,
) -> Result<Option<String>> {
    if fresh_conversation {
        if let Err(e) = agent.new_conversation().await {
            qlog_warn!("Could not start a new conversation, reusing current one: {}", e);
        }
    }
    let baseline = match agent.read_latest().await {
        Ok(text) => text,
        Err(e) => {
            qlog_debug!("No baseline transcript before submit: {}", e);
            None
        }
    };
    qlog_debug!(
        "Submitting instruction ({} chars, baseline {} chars)",
        instruction.chars().count(),
        baseline.as_deref().map_or(0, |b| b.chars().count())
    );
    agent.submit(instruction).await?;
    Ok(baseline)
}

/// Connect with a bounded number of attempts and a fixed backoff.
///
/// Returns `Error::Connection` once every attempt has failed, or
/// `Error::Cancelled` if the token fires while waiting.
pub async fn connect_with_retry(
    connector: &dyn Connector,
    endpoint: &str,
    attempts: u32,
    backoff: Duration,
    cancel: &CancellationToken,
) -> Result<Box<dyn RemoteAgent>> {
    let attempts = attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match connector.connect(endpoint).await {
            Ok(agent) => {
                qlog!("Connected to {} (attempt {}/{})", endpoint, attempt, attempts);
                return Ok(agent);
            }
            Err(e) => {
                qlog_warn!(
                    "Connect to {} failed (attempt {}/{}): {}",
                    endpoint,
                    attempt,
                    attempts,
                    e
                );
                last_error = e.to_string();
            }
        }
        if attempt < attempts {
            sleep_or_cancel(backoff, cancel).await?;
        }
    }

    Err(Error::Connection(format!(
        "{} unreachable after {} attempts: {}",
        endpoint, attempts, last_error
    )))
}
