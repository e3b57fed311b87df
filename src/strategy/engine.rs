use crate::data::{BookSnapshot, Direction, StructureIndicators};
use crate::exchange::{PolymarketWebSocket, SnapshotCache};
use crate::strategy::signals::{
    CorrelationResult, CorrelationScanner, FlowDetector, FlowResult, ImbalanceDetector,
    ImbalanceSignal, ScoreInputs, ScoreResult, ScorerError, SignalScorer,
};
use crate::strategy::window::{DeltaReading, DeltaTracker, FireLog, WindowClock};
use crate::utils::config::{AssetConfig, Config};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Structure timeframe fed in from outside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    M5,
    M15,
}

/// Final call for one asset on one tick
#[derive(Debug, Clone, PartialEq)]
pub struct AssetDecision {
    pub asset: String,
    pub score: ScoreResult,
    /// Total plus correlation bonus, capped at 100
    pub adjusted_score: f64,
    /// Set only on the first crossing of the threshold in a window
    pub fire: bool,
    pub size_multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct TickReport {
    pub timestamp: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub seconds_remaining: f64,
    pub new_window: bool,
    pub decisions: Vec<AssetDecision>,
    pub correlation: CorrelationResult,
}

impl TickReport {
    pub fn fired(&self) -> impl Iterator<Item = &AssetDecision> {
        self.decisions.iter().filter(|d| d.fire)
    }
}

/// Point-in-time view of one asset for monitoring
#[derive(Debug, Clone)]
pub struct AssetStatus {
    pub asset: String,
    pub symbol: String,
    pub up_token: Option<String>,
    pub down_token: Option<String>,
    pub delta: Option<DeltaReading>,
    pub flow: Option<FlowResult>,
    pub imbalance: Option<ImbalanceSignal>,
    pub last_score: Option<ScoreResult>,
    pub fired_this_window: bool,
}

struct AssetState {
    config: AssetConfig,
    flow: FlowDetector,
    imbalance: Arc<ImbalanceDetector>,
    delta: DeltaTracker,
    scorer: SignalScorer,
    structure_5m: Option<StructureIndicators>,
    structure_15m: Option<StructureIndicators>,
}

struct TickContext<'a> {
    now: DateTime<Utc>,
    exchange_books: &'a SnapshotCache,
    market_books: &'a SnapshotCache,
    underlying_stale_after: Duration,
    book_stale_after: Duration,
    seconds_remaining: f64,
}

impl AssetState {
    fn reset_window(&mut self) {
        self.flow.reset();
        self.delta.reset();
        self.scorer.reset();
    }

    fn token_books(&self, ctx: &TickContext<'_>) -> (Option<BookSnapshot>, Option<BookSnapshot>) {
        let fetch = |token: &Option<String>| {
            token.as_deref()
                .and_then(|key| ctx.market_books.get_fresh(key, ctx.book_stale_after))
        };
        (fetch(&self.config.up_token), fetch(&self.config.down_token))
    }

    /// Update per-asset detectors and score if a direction can be chosen
    fn evaluate(&mut self, ctx: &TickContext<'_>) -> Option<ScoreResult> {
        let delta = ctx.exchange_books
            .get_fresh(&self.config.symbol, ctx.underlying_stale_after)
            .and_then(|book| book.mid_price_f64())
            .and_then(|price| self.delta.update(price));

        let (up_book, down_book) = self.token_books(ctx);
        let flow_direction = match (&up_book, &down_book) {
            (Some(up), Some(down)) => self.flow
                .feed_at(ctx.now, up.pressure(), down.pressure())
                .direction,
            _ => None,
        };

        let imbalance = self.imbalance.get_signal_at(ctx.now);

        let direction = delta.and_then(|d| d.direction)
            .or(flow_direction)
            .or_else(|| imbalance.as_ref().map(|s| s.direction));
        let Some(direction) = direction else {
            debug!(asset = %self.config.name, "no direction, skipping score");
            return None;
        };

        let (target_token, target_book, complement_book) = match direction {
            Direction::Up => (&self.config.up_token, up_book, down_book),
            Direction::Down => (&self.config.down_token, down_book, up_book),
        };

        let mut inputs = ScoreInputs::new(direction);
        inputs.target_token = target_token.clone();
        if let Some(delta) = delta {
            inputs.delta_pct = delta.delta_pct;
            inputs.delta_sustained_ticks = delta.sustained_ticks;
        }
        inputs.imbalance = imbalance;
        inputs.target_book = target_book;
        inputs.complement_book = complement_book;
        inputs.structure_5m = self.structure_5m;
        inputs.structure_15m = self.structure_15m;
        inputs.seconds_remaining = Some(ctx.seconds_remaining);

        Some(self.scorer.score_at(&inputs, ctx.now))
    }
}

/// Drives every asset through one scoring pass per tick.
///
/// The engine is owned by a single task; only the ingestor caches and the
/// imbalance detectors are shared with background tasks.
pub struct SignalEngine {
    assets: Vec<AssetState>,
    clock: WindowClock,
    fire_log: FireLog,
    scanner: CorrelationScanner,
    open_positions: usize,
    exchange_books: Arc<SnapshotCache>,
    market_books: Arc<SnapshotCache>,
    market_feed: Option<Arc<PolymarketWebSocket>>,
    underlying_stale_after: Duration,
    book_stale_after: Duration,
    last_report: Option<TickReport>,
}

impl SignalEngine {
    pub fn new(
        config: &Config,
        exchange_books: Arc<SnapshotCache>,
        market_books: Arc<SnapshotCache>,
    ) -> Result<Self, ScorerError> {
        let assets = config.assets.iter()
            .map(|asset| {
                let mut asset = asset.clone();
                asset.normalize();
                Ok(AssetState {
                    config: asset,
                    flow: FlowDetector::new(config.flow.clone()),
                    imbalance: Arc::new(ImbalanceDetector::new(config.imbalance.clone())),
                    delta: DeltaTracker::new(),
                    scorer: SignalScorer::new(config.scorer.clone())?,
                    structure_5m: None,
                    structure_15m: None,
                })
            })
            .collect::<Result<Vec<_>, ScorerError>>()?;

        Ok(Self {
            assets,
            clock: WindowClock::new(config.general.window_secs),
            fire_log: FireLog::new(),
            scanner: CorrelationScanner::new(config.correlation.clone()),
            open_positions: 0,
            exchange_books,
            market_books,
            market_feed: None,
            underlying_stale_after: Duration::from_millis(config.feeds.underlying_stale_after_ms),
            book_stale_after: Duration::from_millis(config.feeds.book_stale_after_ms),
            last_report: None,
        })
    }

    /// Route token changes to a live prediction-market feed
    pub fn with_market_feed(mut self, feed: Arc<PolymarketWebSocket>) -> Self {
        self.market_feed = Some(feed);
        self.sync_subscriptions();
        self
    }

    pub fn asset_names(&self) -> impl Iterator<Item = &str> {
        self.assets.iter().map(|a| a.config.name.as_str())
    }

    /// Exchange symbols the engine reads underlying books for
    pub fn symbols(&self) -> BTreeSet<String> {
        self.assets.iter().map(|a| a.config.symbol.clone()).collect()
    }

    /// Every up/down token currently assigned
    pub fn subscribed_tokens(&self) -> BTreeSet<String> {
        self.assets.iter()
            .flat_map(|a| [a.config.up_token.clone(), a.config.down_token.clone()])
            .flatten()
            .collect()
    }

    /// One imbalance sampler per asset, reading its exchange book
    pub fn spawn_imbalance_samplers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.assets.iter()
            .map(|asset| {
                asset.imbalance.spawn_sampler(
                    Arc::clone(&self.exchange_books),
                    asset.config.symbol.clone(),
                    shutdown.clone(),
                )
            })
            .collect()
    }

    /// Assign the tokens of a new market. Flow history for the asset is
    /// dropped since it described the old pair. Returns whether the feed
    /// subscription set changed.
    pub fn set_window_tokens(
        &mut self,
        asset: &str,
        up_token: impl Into<String>,
        down_token: impl Into<String>,
    ) -> bool {
        let Some(state) = self.assets.iter_mut().find(|a| a.config.name == asset) else {
            warn!(asset, "tokens for unknown asset ignored");
            return false;
        };
        let up_token = Some(up_token.into());
        let down_token = Some(down_token.into());
        if state.config.up_token == up_token && state.config.down_token == down_token {
            return false;
        }

        state.config.up_token = up_token;
        state.config.down_token = down_token;
        state.flow.reset();
        state.scorer.reset();
        info!(asset, "window tokens updated");

        self.sync_subscriptions()
    }

    fn sync_subscriptions(&self) -> bool {
        match &self.market_feed {
            Some(feed) => feed.update_subscriptions(self.subscribed_tokens()),
            None => true,
        }
    }

    /// Returns false for an unknown asset
    pub fn set_structure(&mut self, asset: &str, timeframe: Timeframe, indicators: StructureIndicators) -> bool {
        let Some(state) = self.assets.iter_mut().find(|a| a.config.name == asset) else {
            return false;
        };
        match timeframe {
            Timeframe::M5 => state.structure_5m = Some(indicators),
            Timeframe::M15 => state.structure_15m = Some(indicators),
        }
        true
    }

    pub fn set_open_positions(&mut self, count: usize) {
        self.open_positions = count;
    }

    pub fn open_positions(&self) -> usize {
        self.open_positions
    }

    pub fn last_report(&self) -> Option<&TickReport> {
        self.last_report.as_ref()
    }

    pub fn get_status(&self, asset: &str) -> Option<AssetStatus> {
        let state = self.assets.iter().find(|a| a.config.name == asset)?;
        Some(AssetStatus {
            asset: state.config.name.clone(),
            symbol: state.config.symbol.clone(),
            up_token: state.config.up_token.clone(),
            down_token: state.config.down_token.clone(),
            delta: state.delta.last(),
            flow: state.flow.last_result().cloned(),
            imbalance: state.imbalance.get_signal(),
            last_score: state.scorer.last_result().cloned(),
            fired_this_window: self.fire_log.has_fired(asset),
        })
    }

    pub fn tick(&mut self) -> &TickReport {
        self.tick_at(Utc::now())
    }

    pub fn tick_at(&mut self, now: DateTime<Utc>) -> &TickReport {
        let new_window = self.clock.advance(now).is_some();
        if new_window {
            for asset in &mut self.assets {
                asset.reset_window();
            }
            self.fire_log.clear();
            info!(window_start = %self.clock.window_start(now), "new window");
        }

        let ctx = TickContext {
            now,
            exchange_books: &self.exchange_books,
            market_books: &self.market_books,
            underlying_stale_after: self.underlying_stale_after,
            book_stale_after: self.book_stale_after,
            seconds_remaining: self.clock.seconds_remaining(now),
        };

        let scored: Vec<(String, ScoreResult)> = self.assets.iter_mut()
            .filter_map(|asset| {
                let result = asset.evaluate(&ctx)?;
                Some((asset.config.name.clone(), result))
            })
            .collect();

        let correlation = self.scanner.scan(scored.iter().map(|(_, s)| s), self.open_positions);

        let decisions = scored.into_iter()
            .map(|(asset, score)| {
                let adjusted_score = (score.total_score + correlation.bonus_for(score.direction)).min(100.0);
                let fire = adjusted_score >= score.threshold && self.fire_log.mark(&asset, now);
                if fire {
                    info!(
                        asset = %asset,
                        direction = %score.direction,
                        score = adjusted_score,
                        size_multiplier = correlation.size_multiplier,
                        "signal fired: {}",
                        score.summary()
                    );
                } else {
                    debug!(asset = %asset, score = adjusted_score, "{}", score.summary());
                }
                AssetDecision {
                    asset,
                    score,
                    adjusted_score,
                    fire,
                    size_multiplier: correlation.size_multiplier,
                }
            })
            .collect();

        let report = TickReport {
            timestamp: now,
            window_start: self.clock.window_start(now),
            seconds_remaining: ctx.seconds_remaining,
            new_window,
            decisions,
            correlation,
        };
        self.last_report.insert(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PriceLevel, StructureSignal, Trend};
    use crate::exchange::{IngestorSettings, PolymarketBookFeed, StreamIngestor};
    use crate::strategy::signals::Component;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap()
    }

    fn book(bid: Decimal, ask: Decimal, bid_size: Decimal, ask_size: Decimal) -> BookSnapshot {
        BookSnapshot::from_levels(
            vec![PriceLevel::new(bid, bid_size)],
            vec![PriceLevel::new(ask, ask_size)],
            Utc::now(),
        ).unwrap()
    }

    fn config(threshold: f64) -> Config {
        let mut config = Config::default();
        config.assets = vec![AssetConfig::new("btc", "BTCUSDT"), AssetConfig::new("eth", "ETHUSDT")];
        config.scorer.threshold = threshold;
        config
    }

    fn engine(threshold: f64) -> (SignalEngine, Arc<SnapshotCache>, Arc<SnapshotCache>) {
        let exchange = Arc::new(SnapshotCache::new());
        let market = Arc::new(SnapshotCache::new());
        let engine = SignalEngine::new(&config(threshold), Arc::clone(&exchange), Arc::clone(&market)).unwrap();
        (engine, exchange, market)
    }

    #[test]
    fn test_no_direction_no_decision() {
        let (mut engine, exchange, _) = engine(75.0);
        exchange.insert("BTCUSDT", book(dec!(99.5), dec!(100.5), dec!(1), dec!(1)));

        let report = engine.tick_at(at(1_700_000_130));
        assert!(report.new_window);
        assert!(report.decisions.is_empty());
        assert_eq!(report.correlation.total_scored, 0);
        assert_eq!(report.seconds_remaining, 270.0);
    }

    #[test]
    fn test_delta_sets_direction() {
        let (mut engine, exchange, _) = engine(75.0);
        exchange.insert("BTCUSDT", book(dec!(99.5), dec!(100.5), dec!(1), dec!(1)));
        engine.tick_at(at(1_700_000_130));

        exchange.insert("BTCUSDT", book(dec!(99.0), dec!(99.4), dec!(1), dec!(1)));
        let report = engine.tick_at(at(1_700_000_132));
        assert!(!report.new_window);
        assert_eq!(report.decisions.len(), 1);

        let decision = &report.decisions[0];
        assert_eq!(decision.asset, "btc");
        assert_eq!(decision.score.direction, Direction::Down);
        assert!(decision.adjusted_score >= 0.0 && decision.adjusted_score <= 100.0);
        assert!(!decision.fire);

        let status = engine.get_status("btc").unwrap();
        assert_eq!(status.delta.unwrap().direction, Some(Direction::Down));
        assert!(status.last_score.is_some());
        assert!(engine.get_status("doge").is_none());
    }

    #[test]
    fn test_fires_once_per_window() {
        let (mut engine, exchange, _) = engine(0.0);
        exchange.insert("BTCUSDT", book(dec!(99.5), dec!(100.5), dec!(1), dec!(1)));
        engine.tick_at(at(1_700_000_130));

        exchange.insert("BTCUSDT", book(dec!(100.5), dec!(101.5), dec!(1), dec!(1)));
        assert_eq!(engine.tick_at(at(1_700_000_132)).fired().count(), 1);
        assert_eq!(engine.tick_at(at(1_700_000_134)).fired().count(), 0);
        assert!(engine.get_status("btc").unwrap().fired_this_window);

        // next window: open resets to the current price, then a move fires again
        let report = engine.tick_at(at(1_700_000_400));
        assert!(report.new_window);
        assert!(report.decisions.is_empty());
        assert!(!engine.get_status("btc").unwrap().fired_this_window);

        exchange.insert("BTCUSDT", book(dec!(101.5), dec!(102.5), dec!(1), dec!(1)));
        assert_eq!(engine.tick_at(at(1_700_000_402)).fired().count(), 1);
    }

    #[test]
    fn test_correlation_bonus_applied() {
        let (mut engine, exchange, _) = engine(75.0);
        exchange.insert("BTCUSDT", book(dec!(99.5), dec!(100.5), dec!(1), dec!(1)));
        exchange.insert("ETHUSDT", book(dec!(9.95), dec!(10.05), dec!(1), dec!(1)));
        engine.tick_at(at(1_700_000_130));

        exchange.insert("BTCUSDT", book(dec!(100.5), dec!(101.5), dec!(1), dec!(1)));
        exchange.insert("ETHUSDT", book(dec!(10.05), dec!(10.15), dec!(1), dec!(1)));
        engine.set_open_positions(1);
        let report = engine.tick_at(at(1_700_000_132));

        assert_eq!(report.correlation.aligned_count, 2);
        // two aligned assets earn no bonus under the default ladder
        for decision in &report.decisions {
            assert_eq!(decision.adjusted_score, decision.score.total_score);
            assert_eq!(decision.size_multiplier, 0.8);
        }
    }

    #[test]
    fn test_stale_underlying_ignored() {
        let mut config = config(75.0);
        config.feeds.underlying_stale_after_ms = 0;
        let exchange = Arc::new(SnapshotCache::new());
        let mut engine = SignalEngine::new(&config, Arc::clone(&exchange), Arc::new(SnapshotCache::new())).unwrap();

        exchange.insert("BTCUSDT", book(dec!(99.5), dec!(100.5), dec!(1), dec!(1)));
        engine.tick_at(at(1_700_000_130));
        assert!(engine.get_status("btc").unwrap().delta.is_none());
    }

    #[test]
    fn test_flow_feeds_from_token_books() {
        let (mut engine, _, market) = engine(75.0);
        assert!(engine.set_window_tokens("btc", "up-1", "down-1"));
        assert!(!engine.set_window_tokens("btc", "up-1", "down-1"));

        market.insert("up-1", book(dec!(0.50), dec!(0.52), dec!(100), dec!(100)));
        market.insert("down-1", book(dec!(0.47), dec!(0.49), dec!(100), dec!(100)));
        for i in 0..3 {
            engine.tick_at(at(1_700_000_130 + i * 2));
        }

        let status = engine.get_status("btc").unwrap();
        assert_eq!(status.up_token.as_deref(), Some("up-1"));
        assert_eq!(status.flow.unwrap().snapshot_count, 3);
    }

    #[test]
    fn test_direction_flip_scores_against_own_token_spreads() {
        let (mut engine, exchange, market) = engine(75.0);
        assert!(engine.set_window_tokens("btc", "up-1", "down-1"));
        market.insert("up-1", book(dec!(0.45), dec!(0.55), dec!(10), dec!(10)));
        market.insert("down-1", book(dec!(0.44), dec!(0.46), dec!(10), dec!(10)));

        exchange.insert("BTCUSDT", book(dec!(99.5), dec!(100.5), dec!(1), dec!(1)));
        engine.tick_at(at(1_700_000_130));

        exchange.insert("BTCUSDT", book(dec!(100.5), dec!(101.5), dec!(1), dec!(1)));
        for i in 1..=3 {
            let report = engine.tick_at(at(1_700_000_130 + i * 2));
            assert_eq!(report.decisions[0].score.direction, Direction::Up);
        }

        exchange.insert("BTCUSDT", book(dec!(98.5), dec!(99.5), dec!(1), dec!(1)));
        let report = engine.tick_at(at(1_700_000_138));
        let score = &report.decisions[0].score;
        assert_eq!(score.direction, Direction::Down);
        assert!(score.component(Component::SpreadCompression).unwrap().raw <= 0.3);
    }

    #[test]
    fn test_lowercase_symbol_reads_underlying() {
        let mut config = config(75.0);
        config.assets = vec![AssetConfig {
            name: "btc".to_string(),
            symbol: " btcusdt".to_string(),
            up_token: None,
            down_token: None,
        }];
        let exchange = Arc::new(SnapshotCache::new());
        let mut engine = SignalEngine::new(&config, Arc::clone(&exchange), Arc::new(SnapshotCache::new())).unwrap();
        assert_eq!(engine.symbols().into_iter().collect::<Vec<_>>(), vec!["BTCUSDT"]);

        exchange.insert("BTCUSDT", book(dec!(99.5), dec!(100.5), dec!(1), dec!(1)));
        engine.tick_at(at(1_700_000_130));
        assert!(engine.get_status("btc").unwrap().delta.is_some());
    }

    #[test]
    fn test_imbalance_drives_direction_without_delta() {
        let (mut engine, _, _) = engine(75.0);
        let detector = Arc::clone(&engine.assets[0].imbalance);
        let heavy_asks = book(dec!(99.9), dec!(100.1), dec!(1), dec!(9));
        for i in 0..3 {
            detector.record_at(&heavy_asks, at(1_700_000_120 + i * 2));
        }

        let report = engine.tick_at(at(1_700_000_130));
        assert_eq!(report.decisions.len(), 1);
        assert_eq!(report.decisions[0].score.direction, Direction::Down);
    }

    #[test]
    fn test_structure_and_unknown_assets() {
        let (mut engine, _, _) = engine(75.0);
        let bullish = StructureIndicators {
            bos: Some(StructureSignal::Bullish),
            choch: None,
            trend: Trend::Bullish,
        };
        assert!(engine.set_structure("btc", Timeframe::M5, bullish));
        assert!(engine.set_structure("eth", Timeframe::M15, bullish));
        assert!(!engine.set_structure("doge", Timeframe::M5, bullish));
        assert!(!engine.set_window_tokens("doge", "a", "b"));
        assert_eq!(engine.asset_names().collect::<Vec<_>>(), vec!["btc", "eth"]);
    }

    #[tokio::test]
    async fn test_token_changes_resubscribe_full_set() {
        let feed = Arc::new(
            StreamIngestor::new(PolymarketBookFeed::new("wss://localhost/ws/market"), IngestorSettings::default())
                .unwrap(),
        );
        let (engine, _, _) = engine(75.0);
        let mut engine = engine.with_market_feed(Arc::clone(&feed));

        assert!(engine.set_window_tokens("btc", "up-1", "down-1"));
        assert!(engine.set_window_tokens("eth", "up-2", "down-2"));
        assert_eq!(feed.subscriptions().len(), 4);

        assert!(engine.set_window_tokens("btc", "up-3", "down-3"));
        let subscribed = feed.subscriptions();
        assert!(subscribed.contains("up-3"));
        assert!(!subscribed.contains("up-1"));
        assert_eq!(subscribed, engine.subscribed_tokens());
    }
}
