use crate::data::{parse_levels, BookSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binance partial book depth payload (`<symbol>@depth<levels>@<speed>`).
///
/// Spot streams send `bids`/`asks`; futures streams send `b`/`a` alongside
/// event metadata. Both shapes decode into this struct.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartialDepth {
    #[serde(rename = "lastUpdateId", alias = "u", default)]
    pub last_update_id: u64,

    #[serde(rename = "E", default)]
    pub event_time: Option<u64>,

    #[serde(alias = "b")]
    pub bids: Vec<[String; 2]>,  // [["price", "quantity"], ...]

    #[serde(alias = "a")]
    pub asks: Vec<[String; 2]>,  // [["price", "quantity"], ...]
}

impl PartialDepth {
    /// None when the depth sums overflow
    pub fn to_snapshot(&self, received_at: DateTime<Utc>) -> Option<BookSnapshot> {
        let bids = parse_levels(self.bids.iter().map(|level| (level[0].as_str(), level[1].as_str())));
        let asks = parse_levels(self.asks.iter().map(|level| (level[0].as_str(), level[1].as_str())));
        BookSnapshot::from_levels(bids, asks, received_at)
    }
}

/// Combined-stream envelope: {"stream": "...", "data": {...}}
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope {
    pub stream: String,
    pub data: PartialDepth,
}

impl StreamEnvelope {
    /// "btcusdt@depth10@100ms" → "BTCUSDT"
    pub fn symbol(&self) -> Option<String> {
        let symbol = self.stream.split('@').next()?;
        if symbol.is_empty() || !self.stream.contains("@depth") {
            return None;
        }
        Some(symbol.to_uppercase())
    }
}
