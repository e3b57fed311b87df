use crate::data::{parse_levels, BookSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single price level as sent by the CLOB market channel
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderSummary {
    pub price: String,
    pub size: String,
}

/// Full book for one token
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BookEvent {
    pub asset_id: String,

    #[serde(default)]
    pub market: Option<String>,

    // Older server versions used buys/sells
    #[serde(alias = "buys", default)]
    pub bids: Vec<OrderSummary>,

    #[serde(alias = "sells", default)]
    pub asks: Vec<OrderSummary>,

    #[serde(default)]
    pub timestamp: Option<String>,

    #[serde(default)]
    pub hash: Option<String>,
}

impl BookEvent {
    /// None when the depth sums overflow
    pub fn to_snapshot(&self, received_at: DateTime<Utc>) -> Option<BookSnapshot> {
        let bids = parse_levels(self.bids.iter().map(|level| (level.price.as_str(), level.size.as_str())));
        let asks = parse_levels(self.asks.iter().map(|level| (level.price.as_str(), level.size.as_str())));
        BookSnapshot::from_levels(bids, asks, received_at)
    }
}

/// Market channel event, tagged by `event_type`.
///
/// Only full books feed the cache; incremental events are acknowledged and
/// ignored until the next book.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum MarketChannelEvent {
    Book(BookEvent),
    #[serde(other)]
    Other,
}

/// The server sends either one event or a batch
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MarketChannelFrame {
    Batch(Vec<MarketChannelEvent>),
    Single(MarketChannelEvent),
}

impl MarketChannelFrame {
    pub fn into_events(self) -> Vec<MarketChannelEvent> {
        match self {
            MarketChannelFrame::Batch(events) => events,
            MarketChannelFrame::Single(event) => vec![event],
        }
    }
}

/// Subscribe request. Replaces the server-side set, so it always carries
/// every wanted token.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub assets_ids: Vec<String>,
    #[serde(rename = "type")]
    pub channel: String,
}

impl SubscribeRequest {
    pub fn market<I: IntoIterator<Item = String>>(assets: I) -> Self {
        Self {
            assets_ids: assets.into_iter().collect(),
            channel: "market".to_string(),
        }
    }
}
