pub mod feed;
pub mod cache;
pub mod metrics;
pub mod ingestor;
pub mod binance;
pub mod polymarket;

pub use feed::{Backoff, BookUpdate, ConnectionState, FeedError, FeedProtocol, ParseError};
pub use cache::SnapshotCache;
pub use metrics::IngestorMetrics;
pub use ingestor::{IngestorSettings, StreamIngestor};
pub use binance::{BinanceDepthFeed, BinanceWebSocket};
pub use polymarket::{PolymarketBookFeed, PolymarketWebSocket};
