use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Directional vote used by every signal in the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// Positive → Up, negative → Down, zero / NaN → None
    pub fn from_sign(value: f64) -> Option<Self> {
        if value > 0.0 {
            Some(Direction::Up)
        } else if value < 0.0 {
            Some(Direction::Down)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single resting level of an order book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// price × size, None if it does not fit in a Decimal
    pub fn notional(&self) -> Option<Decimal> {
        self.price.checked_mul(self.size)
    }
}

/// Buy/sell pressure reading for one token
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PressurePair {
    pub buy: f64,
    pub sell: f64,
}

impl PressurePair {
    pub fn new(buy: f64, sell: f64) -> Self {
        Self { buy, sell }
    }

    /// (buy - sell) / (buy + sell), None when both sides are empty
    pub fn imbalance(&self) -> Option<f64> {
        let total = self.buy + self.sell;
        if total <= 0.0 {
            return None;
        }
        Some((self.buy - self.sell) / total)
    }
}

/// Normalized top-of-book view produced by a feed ingestor.
///
/// Snapshots are immutable: the ingestor replaces the cached value for a key
/// with a fresh snapshot on every book message.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    /// Local receive time
    pub timestamp: DateTime<Utc>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,

    /// Σ price×size over the top PRESSURE_LEVELS bids
    pub buy_pressure: f64,

    /// Σ price×size over the top PRESSURE_LEVELS asks
    pub sell_pressure: f64,

    /// best_ask - best_bid, zero when either side is missing
    pub spread: Decimal,

    /// Σ size over the top DEPTH_LEVELS bids
    pub bid_volume: f64,

    /// Σ size over the top DEPTH_LEVELS asks
    pub ask_volume: f64,
}

impl BookSnapshot {
    pub fn pressure(&self) -> PressurePair {
        PressurePair::new(self.buy_pressure, self.sell_pressure)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid?;
        let ask = self.best_ask?;
        Some(bid.checked_add(ask)? / Decimal::TWO)
    }

    pub fn mid_price_f64(&self) -> Option<f64> {
        self.mid_price()?.to_f64()
    }

    pub fn best_ask_f64(&self) -> Option<f64> {
        self.best_ask?.to_f64()
    }

    pub fn spread_f64(&self) -> f64 {
        self.spread.to_f64().unwrap_or(0.0)
    }

    /// Age relative to `now`, saturating at zero for clock skew
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        let age = now - self.timestamp;
        if age < chrono::Duration::zero() {
            chrono::Duration::zero()
        } else {
            age
        }
    }
}

/// Break-of-structure / change-of-character side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureSignal {
    Bullish,
    Bearish,
}

impl StructureSignal {
    pub fn direction(&self) -> Direction {
        match self {
            StructureSignal::Bullish => Direction::Up,
            StructureSignal::Bearish => Direction::Down,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Trend {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Trend::Bullish => Some(Direction::Up),
            Trend::Bearish => Some(Direction::Down),
            Trend::Neutral => None,
        }
    }
}

/// Externally computed market-structure indicators for one timeframe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureIndicators {
    #[serde(default)]
    pub bos: Option<StructureSignal>,
    #[serde(default)]
    pub choch: Option<StructureSignal>,
    #[serde(default)]
    pub trend: Trend,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_direction_from_sign() {
        assert_eq!(Direction::from_sign(0.3), Some(Direction::Up));
        assert_eq!(Direction::from_sign(-0.1), Some(Direction::Down));
        assert_eq!(Direction::from_sign(0.0), None);
        assert_eq!(Direction::from_sign(f64::NAN), None);
        assert_eq!(Direction::Up.opposite(), Direction::Down);
    }

    #[test]
    fn test_pressure_imbalance() {
        let pair = PressurePair::new(75.0, 25.0);
        assert!((pair.imbalance().unwrap() - 0.5).abs() < 1e-9);
        assert!(PressurePair::default().imbalance().is_none());
    }

    #[test]
    fn test_structure_deserialize() {
        let json = r#"{"bos": "bullish", "trend": "bearish"}"#;
        let parsed: StructureIndicators = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.bos, Some(StructureSignal::Bullish));
        assert_eq!(parsed.choch, None);
        assert_eq!(parsed.trend, Trend::Bearish);

        let empty: StructureIndicators = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.trend, Trend::Neutral);
    }

    #[test]
    fn test_mid_price() {
        let snapshot = BookSnapshot {
            timestamp: Utc::now(),
            best_bid: Some(dec!(0.48)),
            best_ask: Some(dec!(0.52)),
            buy_pressure: 0.0,
            sell_pressure: 0.0,
            spread: dec!(0.04),
            bid_volume: 0.0,
            ask_volume: 0.0,
        };
        assert_eq!(snapshot.mid_price(), Some(dec!(0.50)));
        assert!((snapshot.spread_f64() - 0.04).abs() < 1e-9);
    }
}
