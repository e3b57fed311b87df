pub mod signals;
pub mod window;
pub mod engine;

pub use signals::{
    CorrelationScanner, FlowDetector, ImbalanceDetector, SignalScorer,
    CorrelationResult, FlowResult, ImbalanceSignal, ScoreResult,
};
pub use window::{DeltaReading, DeltaTracker, FireLog, WindowClock};
pub use engine::{AssetDecision, AssetStatus, SignalEngine, TickReport, Timeframe};
