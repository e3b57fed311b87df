pub mod types;
pub mod websocket;

pub use types::{PartialDepth, StreamEnvelope};
pub use websocket::{BinanceDepthFeed, BinanceWebSocket};
