use serde::Deserialize;

use super::Strategy;
use crate::error::StrategyError;
use crate::indicators::trailing_mean;
use crate::models::{Decision, OrderSide};

/// Parameters for the SMA crossover rule
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SmaCrossoverConfig {
    pub short_window: usize,
    pub long_window: usize,
    /// Fraction of cash spent when the short SMA is above the long SMA
    pub buy_multiplier: f64,
    /// Fraction of the position sold when the short SMA is below the long SMA
    pub sell_multiplier: f64,
    /// Fraction of cash spent when both SMAs are equal
    pub tie_multiplier: f64,
}

impl Default for SmaCrossoverConfig {
    fn default() -> Self {
        Self {
            short_window: 5,
            long_window: 20,
            buy_multiplier: 0.75,
            sell_multiplier: 0.10,
            tie_multiplier: 0.50,
        }
    }
}

impl SmaCrossoverConfig {
    pub fn validate(&self) -> Result<(), StrategyError> {
        for (name, value) in [
            ("buy_multiplier", self.buy_multiplier),
            ("sell_multiplier", self.sell_multiplier),
            ("tie_multiplier", self.tie_multiplier),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(StrategyError::InvalidMultiplier { name, value });
            }
        }
        Ok(())
    }
}

/// Simple Moving Average crossover.
///
/// Buys when the short SMA is above the long SMA, sells a slice of the
/// position when it is below. Equal SMAs are treated as a buy with the tie
/// multiplier, which keeps accumulating in flat markets.
#[derive(Debug, Clone)]
pub struct SmaCrossover {
    config: SmaCrossoverConfig,
}

impl SmaCrossover {
    pub fn new(config: SmaCrossoverConfig) -> Result<Self, StrategyError> {
        config.validate()?;
        Ok(Self { config })
    }
}

impl Default for SmaCrossover {
    fn default() -> Self {
        Self {
            config: SmaCrossoverConfig::default(),
        }
    }
}

impl Strategy for SmaCrossover {
    fn decide(&self, short: &[f64], long: &[f64]) -> Result<Decision, StrategyError> {
        let insufficient = || StrategyError::InsufficientData {
            short: short.len(),
            long: long.len(),
        };

        let short_sma = trailing_mean(short, self.config.short_window).ok_or_else(insufficient)?;
        let long_sma = trailing_mean(long, self.config.long_window).ok_or_else(insufficient)?;

        tracing::debug!(
            "SMA({})={:.4} SMA({})={:.4}",
            self.config.short_window,
            short_sma,
            self.config.long_window,
            long_sma
        );

        let decision = if short_sma > long_sma {
            Decision {
                side: Some(OrderSide::Buy),
                multiplier: self.config.buy_multiplier,
            }
        } else if short_sma < long_sma {
            Decision {
                side: Some(OrderSide::Sell),
                multiplier: self.config.sell_multiplier,
            }
        } else {
            Decision {
                side: Some(OrderSide::Buy),
                multiplier: self.config.tie_multiplier,
            }
        };

        Ok(decision)
    }

    fn name(&self) -> &str {
        "SmaCrossover"
    }

    fn short_window(&self) -> usize {
        self.config.short_window
    }

    fn long_window(&self) -> usize {
        self.config.long_window
    }
}
