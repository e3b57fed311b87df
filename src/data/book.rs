use crate::data::types::{BookSnapshot, PriceLevel};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Levels per side summed into buy/sell pressure
pub const PRESSURE_LEVELS: usize = 5;

/// Levels per side summed into bid/ask volume for imbalance
pub const DEPTH_LEVELS: usize = 10;

/// Parse raw (price, size) string pairs into levels.
///
/// Unparsable entries, levels with a non-positive price or size, and levels
/// whose notional overflows are dropped; order is preserved.
pub fn parse_levels<'a, I>(raw: I) -> Vec<PriceLevel>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    raw.into_iter()
        .filter_map(|(price, size)| {
            let price = price.trim().parse::<Decimal>().ok()?;
            let size = size.trim().parse::<Decimal>().ok()?;
            if price <= Decimal::ZERO || size <= Decimal::ZERO {
                return None;
            }
            let level = PriceLevel::new(price, size);
            level.notional()?;
            Some(level)
        })
        .collect()
}

fn notional_sum(levels: &[PriceLevel], depth: usize) -> Option<f64> {
    levels.iter()
        .take(depth)
        .try_fold(Decimal::ZERO, |sum, level| sum.checked_add(level.notional()?))?
        .to_f64()
}

fn size_sum(levels: &[PriceLevel], depth: usize) -> Option<f64> {
    levels.iter()
        .take(depth)
        .try_fold(Decimal::ZERO, |sum, level| sum.checked_add(level.size))?
        .to_f64()
}

impl BookSnapshot {
    /// Build a snapshot from unsorted levels.
    ///
    /// Algorithm:
    /// 1. Sort bids descending, asks ascending by price
    /// 2. Best bid/ask = index 0 of each side
    /// 3. Pressure = Σ price×size over the top PRESSURE_LEVELS per side
    /// 4. Volume = Σ size over the top DEPTH_LEVELS per side
    /// 5. Spread = best_ask - best_bid (zero if either side is empty or the
    ///    feed delivered a crossed book)
    ///
    /// Returns None when a pressure or volume sum overflows.
    pub fn from_levels(
        mut bids: Vec<PriceLevel>,
        mut asks: Vec<PriceLevel>,
        timestamp: DateTime<Utc>,
    ) -> Option<Self> {
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        let best_bid = bids.first().map(|level| level.price);
        let best_ask = asks.first().map(|level| level.price);

        let spread = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => (ask - bid).max(Decimal::ZERO),
            _ => Decimal::ZERO,
        };

        Some(Self {
            timestamp,
            best_bid,
            best_ask,
            buy_pressure: notional_sum(&bids, PRESSURE_LEVELS)?,
            sell_pressure: notional_sum(&asks, PRESSURE_LEVELS)?,
            spread,
            bid_volume: size_sum(&bids, DEPTH_LEVELS)?,
            ask_volume: size_sum(&asks, DEPTH_LEVELS)?,
        })
    }
}
