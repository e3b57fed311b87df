use crate::data::BookSnapshot;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

/// Transport-level failures. Always retried by the ingestor, never fatal.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("no message received for {0:?}")]
    ReadTimeout(Duration),

    #[error("websocket transport: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("metrics setup: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Malformed payloads. Dropped and logged; the read loop continues.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected stream: {0}")]
    UnknownStream(String),

    #[error("book for {0} overflows decimal range")]
    Overflow(String),
}

/// One keyed book update decoded from a feed message
#[derive(Debug, Clone)]
pub struct BookUpdate {
    pub key: String,
    pub snapshot: BookSnapshot,
}

/// Wire protocol of a single order-book feed.
///
/// The ingestor owns the connection lifecycle; a protocol only knows how to
/// address the server, what to send, and how to decode what comes back.
pub trait FeedProtocol: Send + Sync + 'static {
    /// Short name used in logs and metric labels
    fn name(&self) -> &str;

    /// Endpoint for the given subscription set
    fn endpoint(&self, keys: &BTreeSet<String>) -> Result<Url, FeedError>;

    /// Canonical form of a subscription key, matching the keys `parse` emits
    fn normalize_key(&self, key: &str) -> String {
        key.to_string()
    }

    /// Message carrying the complete key set.
    ///
    /// `None` means the keys are encoded in the endpoint URL, so a change in
    /// the set forces a reconnect instead.
    fn subscribe_message(&self, keys: &BTreeSet<String>) -> Option<Message>;

    /// Application keepalive sent on the ping interval and after a read timeout
    fn keepalive(&self) -> Message {
        Message::Ping(Vec::new())
    }

    /// Decode a text frame into zero or more book updates
    fn parse(&self, text: &str, received_at: DateTime<Utc>) -> Result<Vec<BookUpdate>, ParseError>;
}

/// Lifecycle of one streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected but a read timeout elapsed; keepalive sent, awaiting traffic
    Degraded,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

/// Exponential reconnect delay: base, 2×base, 4×base ... capped at max
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: base,
        }
    }

    /// Delay to wait now; doubles the next one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
