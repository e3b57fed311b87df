use crate::exchange::binance::types::StreamEnvelope;
use crate::exchange::feed::{BookUpdate, FeedError, FeedProtocol, ParseError};
use crate::exchange::ingestor::StreamIngestor;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Secondary-exchange order-book ingestor
pub type BinanceWebSocket = StreamIngestor<BinanceDepthFeed>;

/// Binance partial-depth combined stream.
///
/// Streams: {symbol}@depth{levels}@{speed}ms for every subscribed symbol.
/// Symbols live in the URL, so a subscription change reconnects.
#[derive(Debug, Clone)]
pub struct BinanceDepthFeed {
    ws_endpoint: String,
    levels: u16,
    speed_ms: u16,
}

impl BinanceDepthFeed {
    /// `levels` must be one of 5, 10, 20; `speed_ms` 100 or 1000
    pub fn new(ws_endpoint: impl Into<String>, levels: u16, speed_ms: u16) -> Self {
        Self {
            ws_endpoint: ws_endpoint.into(),
            levels,
            speed_ms,
        }
    }

    fn stream_name(&self, symbol: &str) -> String {
        format!("{}@depth{}@{}ms", symbol.to_lowercase(), self.levels, self.speed_ms)
    }
}

impl FeedProtocol for BinanceDepthFeed {
    fn name(&self) -> &str {
        "binance"
    }

    fn endpoint(&self, keys: &BTreeSet<String>) -> Result<Url, FeedError> {
        let streams = keys.iter()
            .map(|symbol| self.stream_name(symbol))
            .collect::<Vec<_>>()
            .join("/");

        let mut url = Url::parse(self.ws_endpoint.trim_end_matches('/'))?;
        url.set_path("/stream");
        url.set_query(Some(&format!("streams={}", streams)));
        Ok(url)
    }

    fn normalize_key(&self, key: &str) -> String {
        key.trim().to_uppercase()
    }

    fn subscribe_message(&self, _keys: &BTreeSet<String>) -> Option<Message> {
        None
    }

    fn parse(&self, text: &str, received_at: DateTime<Utc>) -> Result<Vec<BookUpdate>, ParseError> {
        let envelope: StreamEnvelope = serde_json::from_str(text)?;
        let key = envelope.symbol()
            .ok_or_else(|| ParseError::UnknownStream(envelope.stream.clone()))?;

        let snapshot = envelope.data.to_snapshot(received_at)
            .ok_or_else(|| ParseError::Overflow(key.clone()))?;

        Ok(vec![BookUpdate { key, snapshot }])
    }
}
