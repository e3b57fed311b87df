use crate::exchange::IngestorSettings;
use crate::strategy::signals::{CorrelationConfig, FlowConfig, ImbalanceConfig, ScorerConfig, ScorerError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Startup configuration failures. Raised before any feed connects.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid scorer settings: {0}")]
    Scorer(#[from] ScorerError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default)]
    pub imbalance: ImbalanceConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub environment: String,
    pub tick_interval_ms: u64,
    pub window_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            tick_interval_ms: 2_000,
            window_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    pub binance_ws_endpoint: String,
    pub binance_depth_levels: u16,
    pub binance_update_speed_ms: u16,
    pub polymarket_ws_endpoint: String,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub read_timeout_ms: u64,
    pub ping_interval_ms: u64,
    /// Prediction-market books older than this are ignored
    pub book_stale_after_ms: u64,
    /// Exchange books older than this give no underlying price
    pub underlying_stale_after_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            binance_ws_endpoint: "wss://stream.binance.com:9443".to_string(),
            binance_depth_levels: 10,
            binance_update_speed_ms: 100,
            polymarket_ws_endpoint: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 60_000,
            read_timeout_ms: 30_000,
            ping_interval_ms: 10_000,
            book_stale_after_ms: 30_000,
            underlying_stale_after_ms: 10_000,
            stop_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub output: String,
    /// Empty for stdout
    pub file_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: "pretty".to_string(),
            file_path: String::new(),
        }
    }
}

/// One tracked asset: its exchange symbol and, once known, the paired
/// up/down tokens of the current window's market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetConfig {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub up_token: Option<String>,
    #[serde(default)]
    pub down_token: Option<String>,
}

impl AssetConfig {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        let mut asset = Self {
            name: name.into(),
            symbol: symbol.into(),
            up_token: None,
            down_token: None,
        };
        asset.normalize();
        asset
    }

    /// Exchange symbols are matched uppercase, as the feed reports them
    pub fn normalize(&mut self) {
        self.symbol = self.symbol.trim().to_uppercase();
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::from_str(contents)?;
        config.assets.iter_mut().for_each(AssetConfig::normalize);
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        contents.parse()
    }

    /// Load from CONFIG_FILE (after reading .env) or the default path
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let path = std::env::var("CONFIG_FILE")
            .unwrap_or_else(|_| "config/default.toml".to_string());
        Self::from_file(path)
    }

    /// Reject settings that would misbehave once streaming starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scorer.validate()?;

        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_string()));

        if self.general.tick_interval_ms == 0 {
            return invalid("general.tick_interval_ms must be positive");
        }
        if self.general.window_secs == 0 {
            return invalid("general.window_secs must be positive");
        }

        let feeds = &self.feeds;
        if feeds.reconnect_base_ms == 0 || feeds.read_timeout_ms == 0 || feeds.ping_interval_ms == 0 {
            return invalid("feed intervals must be positive");
        }
        if feeds.reconnect_base_ms > feeds.reconnect_max_ms {
            return invalid("feeds.reconnect_base_ms exceeds feeds.reconnect_max_ms");
        }
        if ![5, 10, 20].contains(&feeds.binance_depth_levels) {
            return invalid("feeds.binance_depth_levels must be 5, 10 or 20");
        }
        if ![100, 1000].contains(&feeds.binance_update_speed_ms) {
            return invalid("feeds.binance_update_speed_ms must be 100 or 1000");
        }

        if self.flow.baseline_count == 0 || self.flow.recent_count == 0 {
            return invalid("flow baseline_count and recent_count must be positive");
        }
        if self.flow.min_snapshots < self.flow.baseline_count.max(self.flow.recent_count).max(2) {
            return invalid("flow.min_snapshots must cover baseline_count and recent_count");
        }
        if !(0.0..0.5).contains(&self.flow.change_threshold) {
            return invalid("flow.change_threshold must be in [0, 0.5)");
        }

        if self.imbalance.capacity < self.imbalance.sustained_ticks || self.imbalance.sustained_ticks == 0 {
            return invalid("imbalance.capacity must hold at least sustained_ticks readings");
        }
        if !(0.0..=1.0).contains(&self.imbalance.threshold) {
            return invalid("imbalance.threshold must be in [0, 1]");
        }
        if self.imbalance.sample_interval_ms == 0 {
            return invalid("imbalance.sample_interval_ms must be positive");
        }

        if self.assets.is_empty() {
            return invalid("at least one [[assets]] entry is required");
        }
        let mut names = HashSet::new();
        for asset in &self.assets {
            if asset.name.is_empty() || asset.symbol.is_empty() {
                return invalid("asset name and symbol must be non-empty");
            }
            if !names.insert(asset.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate asset {}", asset.name)));
            }
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.general.tick_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.feeds.stop_timeout_ms)
    }

    pub fn ingestor_settings(&self) -> IngestorSettings {
        IngestorSettings {
            reconnect_base: Duration::from_millis(self.feeds.reconnect_base_ms),
            reconnect_max: Duration::from_millis(self.feeds.reconnect_max_ms),
            read_timeout: Duration::from_millis(self.feeds.read_timeout_ms),
            ping_interval: Duration::from_millis(self.feeds.ping_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[assets]]
        name = "btc"
        symbol = "BTCUSDT"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = MINIMAL.parse().unwrap();
        assert_eq!(config.general.tick_interval_ms, 2_000);
        assert_eq!(config.scorer.threshold, 75.0);
        assert_eq!(config.scorer.weights.total(), 100);
        assert_eq!(config.flow.min_snapshots, 5);
        assert_eq!(config.imbalance.capacity, 30);
        assert_eq!(config.assets[0].up_token, None);
        assert_eq!(config.tick_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = Config::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml")).unwrap();
        assert!(config.assets.len() >= 1);
        assert_eq!(config.ingestor_settings().reconnect_base, Duration::from_secs(1));
    }

    #[test]
    fn test_bad_weights_fail_fast() {
        let toml = format!("{}\n[scorer.weights]\nprice_edge = 6\n", MINIMAL);
        let err = toml.parse::<Config>().unwrap_err();
        assert!(matches!(err, ConfigError::Scorer(ScorerError::WeightSum(101))));
    }

    #[test]
    fn test_unparseable_threshold() {
        let toml = format!("{}\n[scorer]\nthreshold = \"high\"\n", MINIMAL);
        assert!(matches!(toml.parse::<Config>(), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let no_assets = "[general]\ntick_interval_ms = 1000\n";
        assert!(matches!(no_assets.parse::<Config>(), Err(ConfigError::Invalid(_))));

        let duplicate = format!("{}{}", MINIMAL, MINIMAL);
        assert!(matches!(duplicate.parse::<Config>(), Err(ConfigError::Invalid(_))));

        let backoff = format!("{}\n[feeds]\nreconnect_base_ms = 90000\n", MINIMAL);
        assert!(matches!(backoff.parse::<Config>(), Err(ConfigError::Invalid(_))));

        let flow = format!("{}\n[flow]\nmin_snapshots = 2\n", MINIMAL);
        assert!(matches!(flow.parse::<Config>(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_symbols_normalized_to_uppercase() {
        let config: Config = "[[assets]]\nname = \"eth\"\nsymbol = \" ethusdt \"\n".parse().unwrap();
        assert_eq!(config.assets[0].symbol, "ETHUSDT");
        assert_eq!(AssetConfig::new("sol", "solusdt").symbol, "SOLUSDT");

        let blank = "[[assets]]\nname = \"eth\"\nsymbol = \"  \"\n";
        assert!(matches!(blank.parse::<Config>(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("does/not/exist.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
