// Trading strategy module
pub mod sma_crossover;

pub use sma_crossover::{SmaCrossover, SmaCrossoverConfig};

use crate::error::StrategyError;
use crate::models::Decision;

/// Base trait for trading strategies driven by two closing-price windows
pub trait Strategy: Send + Sync {
    /// Turn short and long windows (oldest to newest) into a decision
    fn decide(&self, short: &[f64], long: &[f64]) -> Result<Decision, StrategyError>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Number of daily closes in the short window
    fn short_window(&self) -> usize;

    /// Number of daily closes in the long window
    fn long_window(&self) -> usize;
}
