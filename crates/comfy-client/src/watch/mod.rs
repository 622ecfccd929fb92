//! Completion Watcher
//!
//! Two ways to learn that a submitted job has finished:
//! - [`PollingWatcher`] asks the history endpoint at a fixed interval
//! - [`StreamingWatcher`] listens on the event stream for the job's
//!   end-of-execution marker
//!
//! Both sit behind [`CompletionSource`] and resolve to the same
//! [`OutputManifest`]. A watcher that gives up only abandons the job on
//! this side; the server keeps running it.

mod polling;
mod streaming;

pub use polling::PollingWatcher;
pub use streaming::StreamingWatcher;

use crate::client::ComfyClient;
use crate::error::ClientError;
use crate::protocol::{JobHandle, OutputManifest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default overall deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Default silence allowed on the event stream
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Completion watcher trait
///
/// `prepare` runs before the job is submitted, `wait` after.
#[async_trait::async_trait]
pub trait CompletionSource: Send {
    /// Session id to include in the submission, if the watcher needs one
    fn client_id(&self) -> Option<&str> {
        None
    }

    /// Set up anything that must exist before submission
    async fn prepare(&mut self, _client: &ComfyClient) -> Result<(), ClientError> {
        Ok(())
    }

    /// Block until the job finishes and return its artifacts
    ///
    /// # Errors
    /// - [`ClientError::Timeout`] when the overall deadline passes
    /// - [`ClientError::StreamClosed`] when the event stream dies first
    /// - [`ClientError::Protocol`] when a finished job reports no outputs
    async fn wait(
        &mut self,
        client: &ComfyClient,
        job: &JobHandle,
    ) -> Result<OutputManifest, ClientError>;

    /// Short name for logging
    fn name(&self) -> &'static str;
}

/// Which watcher to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchStrategy {
    /// Query history at a fixed interval
    #[default]
    Poll,
    /// Follow the event stream
    Stream,
}

impl fmt::Display for WatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Poll => "poll",
            Self::Stream => "stream",
        })
    }
}

impl FromStr for WatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "poll" | "polling" | "http" => Ok(Self::Poll),
            "stream" | "streaming" | "ws" | "websocket" => Ok(Self::Stream),
            other => Err(format!("unknown watch strategy '{other}' (expected poll or stream)")),
        }
    }
}

/// Watcher settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    /// Watcher variant
    pub strategy: WatchStrategy,
    /// Delay between history queries
    pub poll_interval: Duration,
    /// Overall deadline measured from the start of `wait`
    pub timeout: Duration,
    /// Longest silence tolerated on the event stream
    pub read_timeout: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            strategy: WatchStrategy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Instant `timeout` after `start`, or `None` past the clock's range
pub(crate) fn deadline_after(start: Instant, timeout: Duration) -> Option<Instant> {
    start.checked_add(timeout)
}

/// Time left before `deadline`; unbounded without one
pub(crate) fn time_left(deadline: Option<Instant>) -> Duration {
    deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()))
}

/// Build the configured watcher
///
/// `client_id` is only used by the streaming variant.
#[must_use]
pub fn completion_source(settings: &WatchSettings, client_id: &str) -> Box<dyn CompletionSource> {
    match settings.strategy {
        WatchStrategy::Poll => Box::new(PollingWatcher::new(settings.poll_interval, settings.timeout)),
        WatchStrategy::Stream => Box::new(StreamingWatcher::new(
            client_id,
            settings.read_timeout,
            settings.timeout,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parsing() {
        assert_eq!("poll".parse::<WatchStrategy>(), Ok(WatchStrategy::Poll));
        assert_eq!("WebSocket".parse::<WatchStrategy>(), Ok(WatchStrategy::Stream));
        assert!("sse".parse::<WatchStrategy>().is_err());
    }

    #[test]
    fn huge_timeout_has_no_deadline() {
        let start = Instant::now();
        let deadline = deadline_after(start, Duration::from_secs_f64(1e19));
        assert!(deadline.is_none());
        assert_eq!(time_left(deadline), Duration::MAX);

        let near = deadline_after(start, Duration::from_secs(5));
        assert!(time_left(near) <= Duration::from_secs(5));
    }

    #[test]
    fn factory_picks_variant() {
        let poll = completion_source(&WatchSettings::default(), "cid");
        assert_eq!(poll.name(), "poll");
        assert!(poll.client_id().is_none());

        let settings = WatchSettings {
            strategy: WatchStrategy::Stream,
            ..WatchSettings::default()
        };
        let stream = completion_source(&settings, "cid");
        assert_eq!(stream.name(), "stream");
        assert_eq!(stream.client_id(), Some("cid"));
    }
}
