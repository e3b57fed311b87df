use crate::exchange::feed::{BookUpdate, FeedError, FeedProtocol, ParseError};
use crate::exchange::ingestor::StreamIngestor;
use crate::exchange::polymarket::types::{MarketChannelEvent, MarketChannelFrame, SubscribeRequest};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;
use url::Url;

/// Prediction-market order-book ingestor
pub type PolymarketWebSocket = StreamIngestor<PolymarketBookFeed>;

/// CLOB market channel keyed by token id.
///
/// The subscribe message replaces the server-side set, so every change and
/// every reconnect sends the full token list.
#[derive(Debug, Clone)]
pub struct PolymarketBookFeed {
    ws_endpoint: String,
}

impl PolymarketBookFeed {
    pub fn new(ws_endpoint: impl Into<String>) -> Self {
        Self {
            ws_endpoint: ws_endpoint.into(),
        }
    }
}

impl FeedProtocol for PolymarketBookFeed {
    fn name(&self) -> &str {
        "polymarket"
    }

    fn endpoint(&self, _keys: &BTreeSet<String>) -> Result<Url, FeedError> {
        Ok(Url::parse(&self.ws_endpoint)?)
    }

    fn subscribe_message(&self, keys: &BTreeSet<String>) -> Option<Message> {
        let request = SubscribeRequest::market(keys.iter().cloned());
        match serde_json::to_string(&request) {
            Ok(body) => Some(Message::Text(body)),
            Err(e) => {
                warn!(error = %e, "failed to encode subscribe request");
                None
            }
        }
    }

    /// Server expects a text PING and answers PONG
    fn keepalive(&self) -> Message {
        Message::Text("PING".to_string())
    }

    fn parse(&self, text: &str, received_at: DateTime<Utc>) -> Result<Vec<BookUpdate>, ParseError> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("pong") || text.is_empty() {
            return Ok(Vec::new());
        }

        let frame: MarketChannelFrame = serde_json::from_str(text)?;
        let mut updates = Vec::new();
        for event in frame.into_events() {
            let MarketChannelEvent::Book(book) = event else {
                continue;
            };
            let snapshot = book.to_snapshot(received_at)
                .ok_or_else(|| ParseError::Overflow(book.asset_id.clone()))?;
            updates.push(BookUpdate {
                key: book.asset_id,
                snapshot,
            });
        }

        Ok(updates)
    }
}
