use crate::data::{Direction, PressurePair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;

/// Flow detector tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Snapshots needed before evaluating
    pub min_snapshots: usize,
    /// Earliest snapshots of the window averaged into the baseline
    pub baseline_count: usize,
    /// Latest snapshots averaged into the current reading
    pub recent_count: usize,
    /// Rate of change that counts as directional flow
    pub change_threshold: f64,
    pub strong_strength: f64,
    pub strong_sustained: u32,
    /// Retained snapshots per window
    pub max_history: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            min_snapshots: 5,
            baseline_count: 3,
            recent_count: 2,
            change_threshold: 0.20,
            strong_strength: 0.60,
            strong_sustained: 3,
            max_history: 300,
        }
    }
}

/// Pressure readings for the paired up/down tokens at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSnapshot {
    pub timestamp: DateTime<Utc>,
    pub up_buy: f64,
    pub up_sell: f64,
    pub down_buy: f64,
    pub down_sell: f64,
}

impl FlowSnapshot {
    fn average<'a, I>(snapshots: I) -> Option<FlowSnapshot>
    where
        I: Iterator<Item = &'a FlowSnapshot> + Clone,
    {
        let timestamp = snapshots.clone().last()?.timestamp;
        Some(FlowSnapshot {
            timestamp,
            up_buy: snapshots.clone().map(|s| s.up_buy).mean(),
            up_sell: snapshots.clone().map(|s| s.up_sell).mean(),
            down_buy: snapshots.clone().map(|s| s.down_buy).mean(),
            down_sell: snapshots.map(|s| s.down_sell).mean(),
        })
    }
}

/// Rates of change of the current reading against the window baseline
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlowRates {
    pub up_buy: f64,
    pub down_sell: f64,
    pub down_buy: f64,
    pub up_sell: f64,
}

impl FlowRates {
    /// Bullish evidence: more buying of up, or more selling of down
    pub fn up_signal(&self) -> f64 {
        self.up_buy.max(self.down_sell)
    }

    /// Bearish evidence: more buying of down, or more selling of up
    pub fn down_signal(&self) -> f64 {
        self.down_buy.max(self.up_sell)
    }
}

/// Output of one `feed` call
#[derive(Debug, Clone, PartialEq)]
pub struct FlowResult {
    /// None while collecting or when neither side clears the threshold
    pub direction: Option<Direction>,
    pub change: f64,
    pub strength: f64,
    pub sustained_ticks: u32,
    pub is_strong: bool,
    pub snapshot_count: usize,
    /// True while fewer than `min_snapshots` have been fed this window
    pub waiting: bool,
    pub rates: Option<FlowRates>,
}

impl FlowResult {
    fn waiting(snapshot_count: usize) -> Self {
        Self {
            direction: None,
            change: 0.0,
            strength: 0.0,
            sustained_ticks: 0,
            is_strong: false,
            snapshot_count,
            waiting: true,
            rates: None,
        }
    }
}

/// Per-window directional order-flow classifier.
///
/// Algorithm:
/// 1. Collect pressure snapshots for the paired up/down tokens
/// 2. Baseline = average of the first `baseline_count` snapshots of the window
/// 3. Current = average of the latest `recent_count` snapshots
/// 4. Rates of change (current - baseline) / baseline per pressure series
/// 5. Direction = side whose signal clears the threshold and beats the other
/// 6. Strong = strength ≥ 0.60 held for ≥ 3 consecutive evaluations
pub struct FlowDetector {
    config: FlowConfig,
    history: VecDeque<FlowSnapshot>,
    baseline: Option<FlowSnapshot>,
    fed: usize,
    last_direction: Option<Direction>,
    sustained: u32,
    last_result: Option<FlowResult>,
}

impl FlowDetector {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.max_history.min(1024)),
            config,
            baseline: None,
            fed: 0,
            last_direction: None,
            sustained: 0,
            last_result: None,
        }
    }

    /// Clear all state. Call exactly once at the start of each window.
    pub fn reset(&mut self) {
        self.history.clear();
        self.baseline = None;
        self.fed = 0;
        self.last_direction = None;
        self.sustained = 0;
        self.last_result = None;
    }

    pub fn feed(&mut self, up: PressurePair, down: PressurePair) -> FlowResult {
        self.feed_at(Utc::now(), up, down)
    }

    pub fn feed_at(&mut self, now: DateTime<Utc>, up: PressurePair, down: PressurePair) -> FlowResult {
        // Keep history strictly time-ordered
        let timestamp = match self.history.back() {
            Some(last) if now < last.timestamp => last.timestamp,
            _ => now,
        };

        self.history.push_back(FlowSnapshot {
            timestamp,
            up_buy: up.buy,
            up_sell: up.sell,
            down_buy: down.buy,
            down_sell: down.sell,
        });
        self.fed += 1;

        if self.baseline.is_none() && self.history.len() >= self.config.baseline_count {
            self.baseline = FlowSnapshot::average(self.history.iter().take(self.config.baseline_count));
        }

        while self.history.len() > self.config.max_history.max(self.config.recent_count) {
            self.history.pop_front();
        }

        let result = self.evaluate();
        self.last_result = Some(result.clone());
        result
    }

    fn evaluate(&mut self) -> FlowResult {
        if self.fed < self.config.min_snapshots {
            return FlowResult::waiting(self.fed);
        }

        let Some(baseline) = self.baseline else {
            return FlowResult::waiting(self.fed);
        };

        let recent = self.history.iter().rev().take(self.config.recent_count);
        let Some(current) = FlowSnapshot::average(recent) else {
            return FlowResult::waiting(self.fed);
        };

        let rates = FlowRates {
            up_buy: rate_of_change(baseline.up_buy, current.up_buy),
            down_sell: rate_of_change(baseline.down_sell, current.down_sell),
            down_buy: rate_of_change(baseline.down_buy, current.down_buy),
            up_sell: rate_of_change(baseline.up_sell, current.up_sell),
        };

        let up_signal = rates.up_signal();
        let down_signal = rates.down_signal();
        let threshold = self.config.change_threshold;

        let direction = if up_signal > threshold && up_signal > down_signal {
            Some(Direction::Up)
        } else if down_signal > threshold && down_signal > up_signal {
            Some(Direction::Down)
        } else {
            None
        };

        let change = match direction {
            Some(Direction::Up) => up_signal,
            Some(Direction::Down) => down_signal,
            None => up_signal.max(down_signal),
        };

        self.sustained = match direction {
            None => 0,
            Some(dir) if self.last_direction == Some(dir) => self.sustained + 1,
            Some(_) => 1,
        };
        self.last_direction = direction;

        let strength = flow_strength(change, threshold);
        let is_strong = direction.is_some()
            && strength >= self.config.strong_strength
            && self.sustained >= self.config.strong_sustained;

        FlowResult {
            direction,
            change,
            strength,
            sustained_ticks: self.sustained,
            is_strong,
            snapshot_count: self.fed,
            waiting: false,
            rates: Some(rates),
        }
    }

    /// Most recent result, None before the first feed of the window
    pub fn last_result(&self) -> Option<&FlowResult> {
        self.last_result.as_ref()
    }

    pub fn snapshot_count(&self) -> usize {
        self.fed
    }

    pub fn history(&self) -> impl Iterator<Item = &FlowSnapshot> {
        self.history.iter()
    }
}

impl Default for FlowDetector {
    fn default() -> Self {
        Self::new(FlowConfig::default())
    }
}

fn rate_of_change(baseline: f64, current: f64) -> f64 {
    if baseline == 0.0 {
        return 0.0;
    }
    (current - baseline) / baseline
}

/// Map a rate of change to [0, 1]: threshold → 0.4, 0.50 → 1.0, linear
fn flow_strength(change: f64, threshold: f64) -> f64 {
    const FULL_CHANGE: f64 = 0.50;
    const THRESHOLD_STRENGTH: f64 = 0.4;

    if change <= 0.0 {
        return 0.0;
    }
    if change >= FULL_CHANGE {
        return 1.0;
    }
    let span = FULL_CHANGE - threshold;
    if span <= 0.0 {
        return 1.0;
    }
    let strength = THRESHOLD_STRENGTH + (change - threshold) / span * (1.0 - THRESHOLD_STRENGTH);
    strength.clamp(0.0, 1.0)
}
