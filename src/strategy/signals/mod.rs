pub mod flow;
pub mod imbalance;
pub mod scorer;
pub mod correlation;

pub use flow::{FlowConfig, FlowDetector, FlowRates, FlowResult, FlowSnapshot};
pub use imbalance::{ImbalanceConfig, ImbalanceDetector, ImbalanceReading, ImbalanceSignal, ImbalanceStats};
pub use scorer::{
    Component, ComponentScore, ScoreInputs, ScoreResult, ScoreWeights,
    ScorerConfig, ScorerError, SignalScorer,
};
pub use correlation::{CorrelationConfig, CorrelationResult, CorrelationScanner, Dominant, VoteSource};
