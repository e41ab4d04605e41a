// In crates/strategies/src/lib.rs

use core_types::{ConfidenceSignal, MarketSnapshot};

pub mod error;
pub mod factory;
pub mod indicator_scorer;
pub mod types;

pub use error::{Error, Result};
pub use factory::create_scorer;
pub use indicator_scorer::IndicatorScorer;
pub use types::ScorerSettings;

/// The universal interface for turning market data into a confidence signal.
///
/// Implementations must be pure with respect to their input: scoring the same
/// `MarketSnapshot` twice yields the same `ConfidenceSignal`. The decision
/// loop calls this exactly once per cycle.
pub trait ConfidenceScorer: Send + Sync {
    /// The name of the scorer, used in logs and status output.
    fn name(&self) -> &'static str;

    /// Scores a snapshot.
    ///
    /// # Returns
    ///
    /// A signal whose `score` is within [0, 1]. When the snapshot does not
    /// carry enough history the signal is flat with a zero score.
    fn score(&self, snapshot: &MarketSnapshot) -> ConfidenceSignal;
}
