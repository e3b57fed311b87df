use crate::data::{BookSnapshot, Direction};
use crate::exchange::SnapshotCache;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Imbalance detector tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImbalanceConfig {
    /// Ring buffer capacity
    pub capacity: usize,
    pub sample_interval_ms: u64,
    /// Minimum |imbalance| of the latest reading
    pub threshold: f64,
    /// Consecutive most-recent readings that must agree
    pub sustained_ticks: usize,
    /// Fraction of `threshold` each sustained reading must reach
    pub sustain_fraction: f64,
    pub stale_after_ms: u64,
}

impl Default for ImbalanceConfig {
    fn default() -> Self {
        Self {
            capacity: 30,
            sample_interval_ms: 2_000,
            threshold: 0.25,
            sustained_ticks: 3,
            sustain_fraction: 0.7,
            stale_after_ms: 10_000,
        }
    }
}

impl ImbalanceConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

/// One sampled depth imbalance
#[derive(Debug, Clone, PartialEq)]
pub struct ImbalanceReading {
    pub timestamp: DateTime<Utc>,
    pub bid_volume: f64,
    pub ask_volume: f64,
    /// (bid - ask) / (bid + ask), in [-1, 1]
    pub imbalance: f64,
    pub direction: Direction,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
}

impl ImbalanceReading {
    /// None when the book carries no volume on either side
    pub fn from_snapshot(snapshot: &BookSnapshot, timestamp: DateTime<Utc>) -> Option<Self> {
        let total = snapshot.bid_volume + snapshot.ask_volume;
        if total <= 0.0 {
            return None;
        }

        let imbalance = ((snapshot.bid_volume - snapshot.ask_volume) / total).clamp(-1.0, 1.0);
        let direction = if imbalance > 0.0 { Direction::Up } else { Direction::Down };

        Some(Self {
            timestamp,
            bid_volume: snapshot.bid_volume,
            ask_volume: snapshot.ask_volume,
            imbalance,
            direction,
            best_bid: snapshot.best_bid,
            best_ask: snapshot.best_ask,
        })
    }
}

/// Sustained, fresh, above-threshold depth imbalance
#[derive(Debug, Clone, PartialEq)]
pub struct ImbalanceSignal {
    pub direction: Direction,
    pub imbalance: f64,
    /// threshold → 0.0, threshold + 0.50 → 1.0
    pub strength: f64,
    pub sustained_ticks: usize,
    pub timestamp: DateTime<Utc>,
}

/// Secondary-exchange depth imbalance detector.
///
/// Readings are sampled on a fixed cadence from the latest cached book, not
/// on every feed update. The ring buffer is guarded for one feeding writer
/// and any number of readers.
pub struct ImbalanceDetector {
    config: ImbalanceConfig,
    readings: RwLock<VecDeque<ImbalanceReading>>,
}

impl ImbalanceDetector {
    pub fn new(config: ImbalanceConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            config,
            readings: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn config(&self) -> &ImbalanceConfig {
        &self.config
    }

    /// Sample the book now
    pub fn record(&self, snapshot: &BookSnapshot) -> Option<ImbalanceReading> {
        self.record_at(snapshot, Utc::now())
    }

    pub fn record_at(&self, snapshot: &BookSnapshot, now: DateTime<Utc>) -> Option<ImbalanceReading> {
        let reading = ImbalanceReading::from_snapshot(snapshot, now)?;
        self.push(reading.clone());
        Some(reading)
    }

    /// Append a reading, evicting the oldest at capacity.
    ///
    /// A reading older than the newest one is rejected to keep the buffer
    /// time-ordered.
    pub fn push(&self, reading: ImbalanceReading) -> bool {
        let mut readings = self.readings.write();
        if let Some(last) = readings.back() {
            if reading.timestamp < last.timestamp {
                return false;
            }
        }
        if readings.len() >= self.config.capacity.max(1) {
            readings.pop_front();
        }
        readings.push_back(reading);
        true
    }

    pub fn get_signal(&self) -> Option<ImbalanceSignal> {
        self.get_signal_at(Utc::now())
    }

    /// Signal requires:
    /// 1. At least `sustained_ticks` readings
    /// 2. Latest reading younger than `stale_after`
    /// 3. Latest |imbalance| ≥ threshold
    /// 4. The `sustained_ticks` most recent readings share its direction with
    ///    |imbalance| ≥ sustain_fraction × threshold
    pub fn get_signal_at(&self, now: DateTime<Utc>) -> Option<ImbalanceSignal> {
        let readings = self.readings.read();
        let required = self.config.sustained_ticks.max(1);
        if readings.len() < required {
            return None;
        }

        let latest = readings.back()?;
        let age = (now - latest.timestamp).to_std().unwrap_or(Duration::ZERO);
        if age >= self.config.stale_after() {
            return None;
        }

        let threshold = self.config.threshold;
        if latest.imbalance.abs() < threshold {
            return None;
        }

        let floor = threshold * self.config.sustain_fraction;
        let sustained = readings.iter()
            .rev()
            .take_while(|r| r.direction == latest.direction && r.imbalance.abs() >= floor)
            .count();
        if sustained < required {
            return None;
        }

        let strength = ((latest.imbalance.abs() - threshold) / 0.50).clamp(0.0, 1.0);

        Some(ImbalanceSignal {
            direction: latest.direction,
            imbalance: latest.imbalance,
            strength,
            sustained_ticks: sustained,
            timestamp: latest.timestamp,
        })
    }

    pub fn latest(&self) -> Option<ImbalanceReading> {
        self.readings.read().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.readings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.read().is_empty()
    }

    /// Clear the buffer on demand
    pub fn reset(&self) {
        self.readings.write().clear();
    }

    pub fn get_stats(&self) -> ImbalanceStats {
        let readings = self.readings.read();
        let mean = if readings.is_empty() {
            0.0
        } else {
            readings.iter().map(|r| r.imbalance).sum::<f64>() / readings.len() as f64
        };

        ImbalanceStats {
            current: readings.back().map(|r| r.imbalance),
            mean,
            sample_count: readings.len(),
        }
    }

    /// Sample `key` from `cache` every `sample_interval` until shutdown.
    ///
    /// Books older than `stale_after` are skipped so a frozen feed ages the
    /// buffer out instead of repeating its last state.
    pub fn spawn_sampler(
        self: &Arc<Self>,
        cache: Arc<SnapshotCache>,
        key: String,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let detector = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(detector.config.sample_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match cache.get_fresh(&key, detector.config.stale_after()) {
                            Some(snapshot) => {
                                if let Some(reading) = detector.record(&snapshot) {
                                    trace!(key = %key, imbalance = reading.imbalance, "imbalance sample");
                                }
                            }
                            None => trace!(key = %key, "no fresh book to sample"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(key = %key, "imbalance sampler stopped");
        })
    }
}

impl Default for ImbalanceDetector {
    fn default() -> Self {
        Self::new(ImbalanceConfig::default())
    }
}

/// Imbalance statistics for monitoring
#[derive(Debug, Clone)]
pub struct ImbalanceStats {
    pub current: Option<f64>,
    pub mean: f64,
    pub sample_count: usize,
}
