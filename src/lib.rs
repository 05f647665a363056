// Core modules
pub mod account;
pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod ledger;
pub mod models;
pub mod scheduler;
pub mod strategy;

// Re-export commonly used types
pub use api::{AlpacaClient, AlpacaCredentials, Brokerage, MarketData};
pub use clock::{MarketClock, Sleeper, TokioSleeper};
pub use error::{ApiError, ConfigError, ExecutionError, LedgerError, StrategyError, ValidationError};
pub use ledger::TradeLedger;
pub use models::*;
pub use scheduler::TradingLoop;
pub use strategy::Strategy;
