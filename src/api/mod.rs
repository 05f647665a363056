pub mod alpaca;

pub use alpaca::{AlpacaClient, AlpacaCredentials};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ApiError;
use crate::models::{AccountSnapshot, Bar, OrderHandle, OrderIntent, Position};

/// Account-level settings that gate what we are allowed to trade
#[derive(Debug, Clone, PartialEq)]
pub struct AccountConfigurations {
    pub fractional_trading: bool,
}

/// Brokerage trading connection.
///
/// Every call is a single blocking round trip; callers await them one at a
/// time and never retry.
#[async_trait]
pub trait Brokerage: Send + Sync {
    async fn get_account(&self) -> Result<AccountSnapshot, ApiError>;

    async fn get_account_configurations(&self) -> Result<AccountConfigurations, ApiError>;

    /// Submit a MARKET order with DAY time-in-force
    async fn submit_order(&self, intent: &OrderIntent) -> Result<OrderHandle, ApiError>;

    async fn get_order(&self, order_id: &str) -> Result<OrderHandle, ApiError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), ApiError>;

    /// Cancel every open order; returns how many the broker acknowledged
    async fn cancel_all_orders(&self) -> Result<usize, ApiError>;

    /// Open position in `symbol`, `None` when flat
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, ApiError>;

    async fn get_all_positions(&self) -> Result<Vec<Position>, ApiError>;
}

/// Historical market-data connection
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Daily bars in `[start, end]`, at most `limit`. Non-trading days have no
    /// bar, so fewer than `limit` may come back.
    async fn get_daily_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Bar>, ApiError>;
}
