use crate::data::{BookSnapshot, Direction, StructureIndicators};
use crate::strategy::signals::imbalance::ImbalanceSignal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ScorerError {
    #[error("component weights sum to {0}, expected 100")]
    WeightSum(u32),

    #[error("threshold {0} outside [0, 100]")]
    Threshold(f64),
}

/// The ten scored components, in weight order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    DeltaMagnitude,
    DeltaSustained,
    ExchangeImbalance,
    SpreadCompression,
    BuyPressureRatio,
    VolumeImbalance,
    Structure5m,
    Structure15m,
    TimePositioning,
    PriceEdge,
}

impl Component {
    pub const ALL: [Component; 10] = [
        Component::DeltaMagnitude,
        Component::DeltaSustained,
        Component::ExchangeImbalance,
        Component::SpreadCompression,
        Component::BuyPressureRatio,
        Component::VolumeImbalance,
        Component::Structure5m,
        Component::Structure15m,
        Component::TimePositioning,
        Component::PriceEdge,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Component::DeltaMagnitude => "delta_magnitude",
            Component::DeltaSustained => "delta_sustained",
            Component::ExchangeImbalance => "exchange_imbalance",
            Component::SpreadCompression => "spread_compression",
            Component::BuyPressureRatio => "buy_pressure_ratio",
            Component::VolumeImbalance => "volume_imbalance",
            Component::Structure5m => "structure_5m",
            Component::Structure15m => "structure_15m",
            Component::TimePositioning => "time_positioning",
            Component::PriceEdge => "price_edge",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Integer weight per component; must sum to exactly 100
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub delta_magnitude: u32,
    pub delta_sustained: u32,
    pub exchange_imbalance: u32,
    pub spread_compression: u32,
    pub buy_pressure_ratio: u32,
    pub volume_imbalance: u32,
    pub structure_5m: u32,
    pub structure_15m: u32,
    pub time_positioning: u32,
    pub price_edge: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            delta_magnitude: 15,
            delta_sustained: 12,
            exchange_imbalance: 15,
            spread_compression: 10,
            buy_pressure_ratio: 10,
            volume_imbalance: 8,
            structure_5m: 12,
            structure_15m: 8,
            time_positioning: 5,
            price_edge: 5,
        }
    }
}

impl ScoreWeights {
    pub fn weight(&self, component: Component) -> u32 {
        match component {
            Component::DeltaMagnitude => self.delta_magnitude,
            Component::DeltaSustained => self.delta_sustained,
            Component::ExchangeImbalance => self.exchange_imbalance,
            Component::SpreadCompression => self.spread_compression,
            Component::BuyPressureRatio => self.buy_pressure_ratio,
            Component::VolumeImbalance => self.volume_imbalance,
            Component::Structure5m => self.structure_5m,
            Component::Structure15m => self.structure_15m,
            Component::TimePositioning => self.time_positioning,
            Component::PriceEdge => self.price_edge,
        }
    }

    pub fn total(&self) -> u32 {
        Component::ALL.iter().map(|c| self.weight(*c)).sum()
    }

    pub fn validate(&self) -> Result<(), ScorerError> {
        match self.total() {
            100 => Ok(()),
            other => Err(ScorerError::WeightSum(other)),
        }
    }
}

/// Scorer tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Minimum total score to trade
    pub threshold: f64,
    pub weights: ScoreWeights,
    /// Trailing window of spread readings for compression
    pub spread_window_secs: u64,
    /// Prior spread readings needed before compression is scored
    pub min_spread_history: usize,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            threshold: 75.0,
            weights: ScoreWeights::default(),
            spread_window_secs: 30,
            min_spread_history: 3,
        }
    }
}

impl ScorerConfig {
    pub fn validate(&self) -> Result<(), ScorerError> {
        self.weights.validate()?;
        if !(0.0..=100.0).contains(&self.threshold) {
            return Err(ScorerError::Threshold(self.threshold));
        }
        Ok(())
    }
}

/// Everything one scoring call looks at. Optional inputs fall back to a
/// per-component neutral default.
#[derive(Debug, Clone)]
pub struct ScoreInputs {
    pub direction: Direction,
    /// Token id behind `target_book`; keys the spread history. Falls back to
    /// the direction when unset.
    pub target_token: Option<String>,
    /// Signed percent move of the underlying since window open
    pub delta_pct: f64,
    /// Consecutive ticks the delta kept its sign
    pub delta_sustained_ticks: u32,
    pub imbalance: Option<ImbalanceSignal>,
    /// Book of the token that pays out if `direction` is right
    pub target_book: Option<BookSnapshot>,
    pub complement_book: Option<BookSnapshot>,
    pub structure_5m: Option<StructureIndicators>,
    pub structure_15m: Option<StructureIndicators>,
    pub seconds_remaining: Option<f64>,
}

impl ScoreInputs {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            target_token: None,
            delta_pct: 0.0,
            delta_sustained_ticks: 0,
            imbalance: None,
            target_book: None,
            complement_book: None,
            structure_5m: None,
            structure_15m: None,
            seconds_remaining: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentScore {
    pub component: Component,
    /// In [0, 1]
    pub raw: f64,
    pub weight: u32,
    pub weighted: f64,
    pub detail: String,
}

/// Immutable outcome of one scoring call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreResult {
    /// In [0, 100]
    pub total_score: f64,
    pub direction: Direction,
    pub components: Vec<ComponentScore>,
    pub should_trade: bool,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

impl ScoreResult {
    pub fn component(&self, component: Component) -> Option<&ComponentScore> {
        self.components.iter().find(|c| c.component == component)
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self.components.iter()
            .map(|c| format!("{}={:.1}", c.component, c.weighted))
            .collect();
        format!(
            "{} {:.1}/{:.0} [{}]",
            self.direction,
            self.total_score,
            self.threshold,
            parts.join(" ")
        )
    }
}

/// Weighted multi-component aggregator.
///
/// Stateless per call apart from trailing windows of spread readings used
/// for compression, one per target token; only touched by the calling thread.
pub struct SignalScorer {
    config: ScorerConfig,
    spread_history: HashMap<String, VecDeque<(DateTime<Utc>, f64)>>,
    last_result: Option<ScoreResult>,
}

impl SignalScorer {
    pub fn new(config: ScorerConfig) -> Result<Self, ScorerError> {
        config.validate()?;
        Ok(Self {
            config,
            spread_history: HashMap::new(),
            last_result: None,
        })
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    pub fn last_result(&self) -> Option<&ScoreResult> {
        self.last_result.as_ref()
    }

    /// Forget spread history (new window, new tokens)
    pub fn reset(&mut self) {
        self.spread_history.clear();
    }

    pub fn score(&mut self, inputs: &ScoreInputs) -> ScoreResult {
        self.score_at(inputs, Utc::now())
    }

    pub fn score_at(&mut self, inputs: &ScoreInputs, now: DateTime<Utc>) -> ScoreResult {
        let direction = inputs.direction;
        let spread = self.spread_compression(inputs, now);

        let raw_scores = [
            delta_magnitude_score(inputs.delta_pct, direction),
            delta_sustained_score(inputs.delta_sustained_ticks),
            imbalance_score(inputs.imbalance.as_ref(), direction),
            spread,
            buy_pressure_ratio_score(inputs.target_book.as_ref(), inputs.complement_book.as_ref()),
            volume_imbalance_score(inputs.target_book.as_ref()),
            structure_score(inputs.structure_5m.as_ref(), direction),
            structure_score(inputs.structure_15m.as_ref(), direction),
            time_score(inputs.seconds_remaining),
            price_edge_score(inputs.target_book.as_ref()),
        ];

        let components: Vec<ComponentScore> = Component::ALL.iter()
            .zip(raw_scores)
            .map(|(component, (raw, detail))| {
                let raw = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };
                let weight = self.config.weights.weight(*component);
                ComponentScore {
                    component: *component,
                    raw,
                    weight,
                    weighted: raw * f64::from(weight),
                    detail,
                }
            })
            .collect();

        let total_score = components.iter().map(|c| c.weighted).sum::<f64>().clamp(0.0, 100.0);
        let result = ScoreResult {
            total_score,
            direction,
            should_trade: total_score >= self.config.threshold,
            threshold: self.config.threshold,
            components,
            timestamp: now,
        };

        self.last_result = Some(result.clone());
        result
    }

    /// Compare the target spread with the mean of prior readings for the
    /// same token in the trailing window, then record it.
    fn spread_compression(&mut self, inputs: &ScoreInputs, now: DateTime<Utc>) -> (f64, String) {
        const NEUTRAL: f64 = 0.3;

        let window = chrono::Duration::seconds(self.config.spread_window_secs as i64);
        self.spread_history.retain(|_, history| {
            while let Some((ts, _)) = history.front() {
                if now - *ts > window {
                    history.pop_front();
                } else {
                    break;
                }
            }
            !history.is_empty()
        });

        let Some(book) = inputs.target_book.as_ref() else {
            return (NEUTRAL, "no book".to_string());
        };
        let current = book.spread_f64();

        let key = inputs.target_token.as_deref().unwrap_or(inputs.direction.as_str());
        let history = self.spread_history.entry(key.to_string()).or_default();

        let result = if history.len() < self.config.min_spread_history {
            (NEUTRAL, format!("history {}", history.len()))
        } else {
            let mean = history.iter().map(|(_, s)| s).sum::<f64>() / history.len() as f64;
            if mean <= 0.0 {
                (NEUTRAL, "flat spread".to_string())
            } else {
                let compression = (mean - current) / mean;
                let raw = interpolate(compression, &[(0.0, 0.1), (0.5, 1.0)]);
                (raw, format!("spread {:.3} vs avg {:.3} ({:+.0}%)", current, mean, compression * 100.0))
            }
        };

        match history.back() {
            Some((ts, _)) if now < *ts => {}
            _ => history.push_back((now, current)),
        }
        result
    }
}

/// Piecewise-linear interpolation through sorted (x, y) points, flat beyond
/// both ends
fn interpolate(x: f64, points: &[(f64, f64)]) -> f64 {
    let Some(&(first_x, first_y)) = points.first() else {
        return 0.0;
    };
    if x <= first_x {
        return first_y;
    }
    for pair in points.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            return y0 + (x - x0) / (x1 - x0) * (y1 - y0);
        }
    }
    points.last().map(|&(_, y)| y).unwrap_or(0.0)
}

fn delta_magnitude_score(delta_pct: f64, direction: Direction) -> (f64, String) {
    let aligned = match direction {
        Direction::Up => delta_pct,
        Direction::Down => -delta_pct,
    };
    if aligned <= 0.0 {
        return (0.0, format!("delta {:+.3}% not {}", delta_pct, direction));
    }
    let raw = interpolate(aligned, &[(0.0, 0.0), (0.05, 0.4), (0.08, 0.7), (0.15, 1.0)]);
    (raw, format!("delta {:+.3}%", delta_pct))
}

fn delta_sustained_score(ticks: u32) -> (f64, String) {
    let raw = match ticks {
        t if t >= 5 => 1.0,
        t if t >= 3 => 0.7,
        2 => 0.4,
        1 => 0.1,
        _ => 0.0,
    };
    (raw, format!("{} ticks", ticks))
}

fn imbalance_score(signal: Option<&ImbalanceSignal>, direction: Direction) -> (f64, String) {
    let Some(signal) = signal else {
        return (0.3, "no imbalance signal".to_string());
    };
    let magnitude = signal.imbalance.abs();

    if signal.direction == direction {
        let raw = interpolate(magnitude, &[(0.0, 0.0), (0.25, 0.6), (0.40, 1.0)]);
        (raw, format!("aligned {:+.2}", signal.imbalance))
    } else {
        let raw = (0.2 * (1.0 - magnitude)).max(0.0);
        (raw, format!("opposed {:+.2}", signal.imbalance))
    }
}

fn buy_pressure_ratio_score(target: Option<&BookSnapshot>, complement: Option<&BookSnapshot>) -> (f64, String) {
    let (Some(target), Some(complement)) = (target, complement) else {
        return (0.3, "missing book".to_string());
    };
    let total = target.buy_pressure + complement.buy_pressure;
    if total <= 0.0 {
        return (0.3, "no buy pressure".to_string());
    }

    let ratio = target.buy_pressure / total;
    let raw = if ratio >= 0.65 {
        1.0
    } else if ratio >= 0.55 {
        0.7
    } else if ratio >= 0.45 {
        0.4
    } else {
        0.1
    };
    (raw, format!("ratio {:.2}", ratio))
}

fn volume_imbalance_score(target: Option<&BookSnapshot>) -> (f64, String) {
    let Some(imbalance) = target.and_then(|book| book.pressure().imbalance()) else {
        return (0.3, "no volume".to_string());
    };

    let raw = if imbalance >= 0.30 {
        1.0
    } else if imbalance >= 0.15 {
        0.7
    } else if imbalance >= 0.0 {
        0.4
    } else {
        0.1
    };
    (raw, format!("imbalance {:+.2}", imbalance))
}

/// Shared rule for both structure timeframes
fn structure_score(structure: Option<&StructureIndicators>, direction: Direction) -> (f64, String) {
    let Some(structure) = structure else {
        return (0.3, "no structure".to_string());
    };

    let confirms = |signal: Option<crate::data::StructureSignal>| {
        signal.map(|s| s.direction() == direction).unwrap_or(false)
    };

    if confirms(structure.bos) || confirms(structure.choch) {
        return (1.0, "break confirms".to_string());
    }
    if structure.choch.map(|s| s.direction() != direction).unwrap_or(false) {
        return (0.0, "reversal against".to_string());
    }
    match structure.trend.direction() {
        Some(trend) if trend == direction => (0.6, "trend aligned".to_string()),
        Some(_) => (0.1, "trend against".to_string()),
        None => (0.3, "neutral".to_string()),
    }
}

/// Sweet spot 30-60s before close
fn time_score(seconds_remaining: Option<f64>) -> (f64, String) {
    let Some(remaining) = seconds_remaining else {
        return (0.3, "no clock".to_string());
    };

    let raw = if remaining < 20.0 {
        0.2
    } else if remaining < 30.0 {
        0.6
    } else if remaining <= 60.0 {
        1.0
    } else if remaining <= 120.0 {
        1.0 - (remaining - 60.0) / 60.0 * 0.4
    } else if remaining <= 180.0 {
        0.5
    } else {
        0.3
    };
    (raw, format!("{:.0}s left", remaining))
}

/// Cheaper target token, more edge
fn price_edge_score(target: Option<&BookSnapshot>) -> (f64, String) {
    let Some(price) = target.and_then(BookSnapshot::best_ask_f64) else {
        return (0.3, "no ask".to_string());
    };

    let raw = if price <= 0.45 {
        1.0
    } else if price <= 0.50 {
        0.8
    } else if price <= 0.55 {
        0.6
    } else if price <= 0.60 {
        0.4
    } else if price <= 0.65 {
        0.2
    } else {
        0.0
    };
    (raw, format!("ask {:.2}", price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PriceLevel, StructureSignal, Trend};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn book(bid: Decimal, ask: Decimal, bid_size: Decimal, ask_size: Decimal) -> BookSnapshot {
        BookSnapshot::from_levels(
            vec![PriceLevel::new(bid, bid_size)],
            vec![PriceLevel::new(ask, ask_size)],
            Utc::now(),
        ).unwrap()
    }

    fn imbalance(direction: Direction, value: f64) -> ImbalanceSignal {
        ImbalanceSignal {
            direction,
            imbalance: value,
            strength: 0.5,
            sustained_ticks: 3,
            timestamp: Utc::now(),
        }
    }

    fn bullish_break() -> StructureIndicators {
        StructureIndicators {
            bos: Some(StructureSignal::Bullish),
            choch: None,
            trend: Trend::Bullish,
        }
    }

    /// Every component at its maximum
    fn max_inputs() -> ScoreInputs {
        ScoreInputs {
            direction: Direction::Up,
            target_token: None,
            delta_pct: 0.20,
            delta_sustained_ticks: 6,
            imbalance: Some(imbalance(Direction::Up, 0.5)),
            // Tight spread, heavy bids, cheap ask
            target_book: Some(book(dec!(0.39), dec!(0.40), dec!(1000), dec!(10))),
            complement_book: Some(book(dec!(0.59), dec!(0.60), dec!(10), dec!(10))),
            structure_5m: Some(bullish_break()),
            structure_15m: Some(bullish_break()),
            seconds_remaining: Some(45.0),
        }
    }

    fn prime_wide_spreads(scorer: &mut SignalScorer, start: DateTime<Utc>) -> DateTime<Utc> {
        let mut inputs = ScoreInputs::new(Direction::Up);
        inputs.target_book = Some(book(dec!(0.35), dec!(0.45), dec!(10), dec!(10)));
        for i in 0..3 {
            scorer.score_at(&inputs, start + chrono::Duration::seconds(i * 2));
        }
        start + chrono::Duration::seconds(6)
    }

    #[test]
    fn test_default_weights_sum_to_100() {
        let weights = ScoreWeights::default();
        assert_eq!(weights.total(), 100);
        assert!(weights.validate().is_ok());
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let config = ScorerConfig {
            weights: ScoreWeights {
                price_edge: 10,
                ..ScoreWeights::default()
            },
            ..ScorerConfig::default()
        };
        assert_eq!(SignalScorer::new(config).err(), Some(ScorerError::WeightSum(105)));

        let config = ScorerConfig {
            threshold: 120.0,
            ..ScorerConfig::default()
        };
        assert_eq!(SignalScorer::new(config).err(), Some(ScorerError::Threshold(120.0)));
    }

    #[test]
    fn test_all_components_at_maximum() {
        let mut scorer = SignalScorer::new(ScorerConfig {
            threshold: 100.0,
            ..ScorerConfig::default()
        })
        .unwrap();
        let now = prime_wide_spreads(&mut scorer, Utc::now());

        let result = scorer.score_at(&max_inputs(), now);
        for component in &result.components {
            assert_eq!(component.raw, 1.0, "{} = {}", component.component, component.detail);
        }
        assert!((result.total_score - 100.0).abs() < 1e-9);
        assert!(result.should_trade);
        assert_eq!(result.components.len(), 10);
    }

    #[test]
    fn test_missing_inputs_use_neutral_defaults() {
        let mut scorer = SignalScorer::new(ScorerConfig::default()).unwrap();
        let result = scorer.score(&ScoreInputs::new(Direction::Down));

        // 0.3 × (15 + 10 + 10 + 8 + 12 + 8 + 5 + 5)
        assert!((result.total_score - 21.9).abs() < 1e-9);
        assert!(!result.should_trade);
        assert_eq!(result.component(Component::DeltaMagnitude).unwrap().raw, 0.0);
        assert_eq!(result.component(Component::ExchangeImbalance).unwrap().raw, 0.3);
        assert!(result.components.iter().all(|c| (0.0..=1.0).contains(&c.raw)));
    }

    #[test]
    fn test_delta_magnitude_curve() {
        assert_eq!(delta_magnitude_score(0.0, Direction::Up).0, 0.0);
        assert!((delta_magnitude_score(0.05, Direction::Up).0 - 0.4).abs() < 1e-9);
        assert!((delta_magnitude_score(0.08, Direction::Up).0 - 0.7).abs() < 1e-9);
        assert!((delta_magnitude_score(-0.115, Direction::Down).0 - 0.85).abs() < 1e-9);
        assert_eq!(delta_magnitude_score(0.5, Direction::Up).0, 1.0);
        // Move against the scored direction
        assert_eq!(delta_magnitude_score(0.10, Direction::Down).0, 0.0);
    }

    #[test]
    fn test_imbalance_aligned_and_opposed() {
        let aligned = imbalance_score(Some(&imbalance(Direction::Up, 0.40)), Direction::Up).0;
        assert!((aligned - 1.0).abs() < 1e-9);

        let mid = imbalance_score(Some(&imbalance(Direction::Up, 0.325)), Direction::Up).0;
        assert!((mid - 0.8).abs() < 1e-9);

        let weak_opposed = imbalance_score(Some(&imbalance(Direction::Down, -0.25)), Direction::Up).0;
        let strong_opposed = imbalance_score(Some(&imbalance(Direction::Down, -0.6)), Direction::Up).0;
        assert!(weak_opposed > strong_opposed);
        assert!(weak_opposed < 0.3);

        assert_eq!(imbalance_score(None, Direction::Up).0, 0.3);
    }

    #[test]
    fn test_structure_rule() {
        let up = Direction::Up;
        assert_eq!(structure_score(Some(&bullish_break()), up).0, 1.0);

        let reversal = StructureIndicators {
            choch: Some(StructureSignal::Bearish),
            trend: Trend::Bullish,
            ..StructureIndicators::default()
        };
        assert_eq!(structure_score(Some(&reversal), up).0, 0.0);

        let trend_only = StructureIndicators {
            trend: Trend::Bullish,
            ..StructureIndicators::default()
        };
        assert_eq!(structure_score(Some(&trend_only), up).0, 0.6);
        assert_eq!(structure_score(Some(&trend_only), Direction::Down).0, 0.1);
        assert_eq!(structure_score(Some(&StructureIndicators::default()), up).0, 0.3);
        assert_eq!(structure_score(None, up).0, 0.3);
    }

    #[test]
    fn test_time_sweet_spot() {
        assert_eq!(time_score(Some(10.0)).0, 0.2);
        assert_eq!(time_score(Some(25.0)).0, 0.6);
        assert_eq!(time_score(Some(30.0)).0, 1.0);
        assert_eq!(time_score(Some(60.0)).0, 1.0);
        assert!((time_score(Some(90.0)).0 - 0.8).abs() < 1e-9);
        assert_eq!(time_score(Some(150.0)).0, 0.5);
        assert_eq!(time_score(Some(240.0)).0, 0.3);
    }

    #[test]
    fn test_price_edge_buckets() {
        let at = |ask: Decimal| price_edge_score(Some(&book(dec!(0.01), ask, dec!(1), dec!(1)))).0;
        assert_eq!(at(dec!(0.40)), 1.0);
        assert_eq!(at(dec!(0.50)), 0.8);
        assert_eq!(at(dec!(0.53)), 0.6);
        assert_eq!(at(dec!(0.60)), 0.4);
        assert_eq!(at(dec!(0.64)), 0.2);
        assert_eq!(at(dec!(0.70)), 0.0);
    }

    #[test]
    fn test_spread_compression_needs_history() {
        let mut scorer = SignalScorer::new(ScorerConfig::default()).unwrap();
        let start = Utc::now();
        let mut inputs = ScoreInputs::new(Direction::Up);
        inputs.target_book = Some(book(dec!(0.35), dec!(0.45), dec!(10), dec!(10)));

        let first = scorer.score_at(&inputs, start);
        assert_eq!(first.component(Component::SpreadCompression).unwrap().raw, 0.3);

        let now = prime_wide_spreads(&mut scorer, start + chrono::Duration::seconds(2));

        // Unchanged spread: no compression
        let flat = scorer.score_at(&inputs, now);
        assert!((flat.component(Component::SpreadCompression).unwrap().raw - 0.1).abs() < 1e-9);

        // History older than 30s is dropped
        let later = scorer.score_at(&inputs, now + chrono::Duration::seconds(120));
        assert_eq!(later.component(Component::SpreadCompression).unwrap().raw, 0.3);
    }

    #[test]
    fn test_spread_history_kept_per_token() {
        let mut scorer = SignalScorer::new(ScorerConfig::default()).unwrap();
        let start = Utc::now();

        let mut up = ScoreInputs::new(Direction::Up);
        up.target_token = Some("up-token".to_string());
        up.target_book = Some(book(dec!(0.45), dec!(0.55), dec!(10), dec!(10)));
        for i in 0..3 {
            scorer.score_at(&up, start + chrono::Duration::seconds(i));
        }

        // Direction flips: the down token's tight spread has no history of
        // its own and must not be compared against the up token's
        let mut down = ScoreInputs::new(Direction::Down);
        down.target_token = Some("down-token".to_string());
        down.target_book = Some(book(dec!(0.44), dec!(0.46), dec!(10), dec!(10)));
        let flipped = scorer.score_at(&down, start + chrono::Duration::seconds(3));
        assert!(flipped.component(Component::SpreadCompression).unwrap().raw <= 0.3);

        // The up token's history is still there
        let back = scorer.score_at(&up, start + chrono::Duration::seconds(4));
        assert!((back.component(Component::SpreadCompression).unwrap().raw - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_decision() {
        let mut scorer = SignalScorer::new(ScorerConfig::default()).unwrap();
        let now = prime_wide_spreads(&mut scorer, Utc::now());

        let result = scorer.score_at(&max_inputs(), now);
        assert!(result.should_trade);
        assert_eq!(result.threshold, 75.0);
        assert_eq!(scorer.last_result(), Some(&result));
        assert!(result.summary().starts_with("up 100.0/75"));
    }
}
