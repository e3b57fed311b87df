pub mod config;
pub mod logger;

pub use config::{AssetConfig, Config, ConfigError};
pub use logger::{init_logger, init_from_config};
