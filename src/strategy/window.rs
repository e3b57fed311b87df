use crate::data::Direction;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Fixed-length trading windows aligned to the Unix epoch
/// (300s → :00, :05, :10 ...)
#[derive(Debug, Clone)]
pub struct WindowClock {
    length_secs: i64,
    current: Option<DateTime<Utc>>,
}

impl WindowClock {
    pub fn new(length_secs: u64) -> Self {
        Self {
            length_secs: (length_secs.max(1)).min(i64::MAX as u64) as i64,
            current: None,
        }
    }

    pub fn length_secs(&self) -> i64 {
        self.length_secs
    }

    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ts = now.timestamp();
        let start = ts - ts.rem_euclid(self.length_secs);
        DateTime::from_timestamp(start, 0).unwrap_or(now)
    }

    pub fn window_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.window_start(now) + chrono::Duration::seconds(self.length_secs)
    }

    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> f64 {
        let remaining = self.window_end(now) - now;
        (remaining.num_milliseconds() as f64 / 1000.0).max(0.0)
    }

    /// Start of the window we are currently in, as last seen by `advance`
    pub fn current(&self) -> Option<DateTime<Utc>> {
        self.current
    }

    /// Returns the new window start the first time `now` falls in a window
    /// different from the last observed one.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = self.window_start(now);
        if self.current == Some(start) {
            return None;
        }
        self.current = Some(start);
        Some(start)
    }
}

/// Underlying move since window open
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaReading {
    pub open_price: f64,
    pub price: f64,
    /// Signed percent
    pub delta_pct: f64,
    pub direction: Option<Direction>,
    /// Consecutive ticks with the same non-zero delta sign
    pub sustained_ticks: u32,
}

/// Tracks the underlying price against the window open. Reset at every
/// window boundary.
#[derive(Debug, Clone, Default)]
pub struct DeltaTracker {
    open_price: Option<f64>,
    last_direction: Option<Direction>,
    sustained: u32,
    last: Option<DeltaReading>,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn open_price(&self) -> Option<f64> {
        self.open_price
    }

    pub fn last(&self) -> Option<DeltaReading> {
        self.last
    }

    /// The first price of a window becomes its open
    pub fn update(&mut self, price: f64) -> Option<DeltaReading> {
        if !price.is_finite() || price <= 0.0 {
            return None;
        }
        let open_price = *self.open_price.get_or_insert(price);

        let delta_pct = (price - open_price) / open_price * 100.0;
        let direction = Direction::from_sign(delta_pct);

        self.sustained = match direction {
            None => 0,
            Some(dir) if self.last_direction == Some(dir) => self.sustained + 1,
            Some(_) => 1,
        };
        self.last_direction = direction;

        let reading = DeltaReading {
            open_price,
            price,
            delta_pct,
            direction,
            sustained_ticks: self.sustained,
        };
        self.last = Some(reading);
        Some(reading)
    }
}

/// Which assets already fired in the current window.
///
/// Owned by the engine; cleared when the window rolls so each asset can fire
/// at most once per window.
#[derive(Debug, Clone, Default)]
pub struct FireLog {
    fired: HashMap<String, DateTime<Utc>>,
}

impl FireLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fire. Returns false if the asset already fired this window.
    pub fn mark(&mut self, asset: &str, now: DateTime<Utc>) -> bool {
        if self.fired.contains_key(asset) {
            return false;
        }
        self.fired.insert(asset.to_string(), now);
        true
    }

    pub fn has_fired(&self, asset: &str) -> bool {
        self.fired.contains_key(asset)
    }

    pub fn fired_at(&self, asset: &str) -> Option<DateTime<Utc>> {
        self.fired.get(asset).copied()
    }

    pub fn count(&self) -> usize {
        self.fired.len()
    }

    pub fn clear(&mut self) {
        self.fired.clear();
    }
}
