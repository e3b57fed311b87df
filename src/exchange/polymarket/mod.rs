pub mod types;
pub mod websocket;

pub use types::{BookEvent, MarketChannelEvent, MarketChannelFrame, OrderSummary, SubscribeRequest};
pub use websocket::{PolymarketBookFeed, PolymarketWebSocket};
