pub mod types;
pub mod book;

pub use types::{
    Direction, PriceLevel, PressurePair, BookSnapshot,
    StructureIndicators, StructureSignal, Trend,
};
pub use book::{parse_levels, DEPTH_LEVELS, PRESSURE_LEVELS};
