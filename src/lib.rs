pub mod data;
pub mod exchange;
pub mod strategy;
pub mod utils;

// Re-export commonly used types
pub use data::{BookSnapshot, Direction, PriceLevel, PressurePair, StructureIndicators};
pub use exchange::{
    BinanceWebSocket, PolymarketWebSocket, SnapshotCache, StreamIngestor,
    ConnectionState, FeedError,
};
pub use strategy::{
    CorrelationScanner, FlowDetector, ImbalanceDetector, SignalScorer,
    SignalEngine, TickReport, AssetDecision,
};
pub use utils::Config;
