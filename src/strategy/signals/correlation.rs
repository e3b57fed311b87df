use crate::data::Direction;
use crate::strategy::signals::scorer::ScoreResult;
use serde::{Deserialize, Serialize};

/// Anything that can cast a directional vote for cross-asset alignment
pub trait VoteSource {
    /// (direction, score), None to abstain
    fn vote(&self) -> Option<(Direction, f64)>;
}

impl VoteSource for ScoreResult {
    fn vote(&self) -> Option<(Direction, f64)> {
        Some((self.direction, self.total_score))
    }
}

impl VoteSource for (Direction, f64) {
    fn vote(&self) -> Option<(Direction, f64)> {
        Some(*self)
    }
}

impl<T: VoteSource> VoteSource for Option<T> {
    fn vote(&self) -> Option<(Direction, f64)> {
        self.as_ref()?.vote()
    }
}

impl<T: VoteSource + ?Sized> VoteSource for &T {
    fn vote(&self) -> Option<(Direction, f64)> {
        (**self).vote()
    }
}

/// Correlation tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub strong_alignment: usize,
    pub strong_bonus: f64,
    pub alignment: usize,
    pub bonus: f64,
    /// Size multiplier indexed by open position count; the last entry
    /// applies to every larger count
    pub size_ladder: Vec<f64>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            strong_alignment: 4,
            strong_bonus: 8.0,
            alignment: 3,
            bonus: 5.0,
            size_ladder: vec![1.0, 0.8, 0.6],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dominant {
    Up,
    Down,
    Mixed,
}

impl Dominant {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Dominant::Up => Some(Direction::Up),
            Dominant::Down => Some(Direction::Down),
            Dominant::Mixed => None,
        }
    }
}

/// Cross-asset alignment for one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationResult {
    pub dominant_direction: Dominant,
    pub aligned_count: usize,
    pub total_scored: usize,
    pub score_bonus: f64,
    pub size_multiplier: f64,
}

impl CorrelationResult {
    /// Bonus earned by an asset voting `direction`
    pub fn bonus_for(&self, direction: Direction) -> f64 {
        if self.dominant_direction.direction() == Some(direction) {
            self.score_bonus
        } else {
            0.0
        }
    }
}

/// Counts directional votes across assets. Holds configuration only; every
/// result is derived fresh from the votes passed in.
#[derive(Debug, Clone, Default)]
pub struct CorrelationScanner {
    config: CorrelationConfig,
}

impl CorrelationScanner {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    pub fn scan<I, V>(&self, votes: I, open_positions: usize) -> CorrelationResult
    where
        I: IntoIterator<Item = V>,
        V: VoteSource,
    {
        let (mut up, mut down) = (0usize, 0usize);
        for (direction, _score) in votes.into_iter().filter_map(|source| source.vote()) {
            match direction {
                Direction::Up => up += 1,
                Direction::Down => down += 1,
            }
        }

        let (dominant_direction, aligned_count) = match up.cmp(&down) {
            std::cmp::Ordering::Greater => (Dominant::Up, up),
            std::cmp::Ordering::Less => (Dominant::Down, down),
            std::cmp::Ordering::Equal => (Dominant::Mixed, up),
        };

        let score_bonus = match dominant_direction {
            Dominant::Mixed => 0.0,
            _ if aligned_count >= self.config.strong_alignment => self.config.strong_bonus,
            _ if aligned_count >= self.config.alignment => self.config.bonus,
            _ => 0.0,
        };

        CorrelationResult {
            dominant_direction,
            aligned_count,
            total_scored: up + down,
            score_bonus,
            size_multiplier: self.size_multiplier(open_positions),
        }
    }

    pub fn size_multiplier(&self, open_positions: usize) -> f64 {
        let ladder = &self.config.size_ladder;
        ladder.get(open_positions)
            .or_else(|| ladder.last())
            .copied()
            .unwrap_or(1.0)
    }
}
