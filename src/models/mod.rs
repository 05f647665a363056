use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ExecutionError;

/// Direction of a market order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Smallest dollar amount the broker accepts for a notional order
pub const MIN_NOTIONAL: f64 = 0.01;

/// Dollar amounts travel to the broker with two decimals
pub fn round_to_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// How an order is sized: dollar amount or share count
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderSizing {
    Notional(f64),
    Quantity(f64),
}

impl OrderSizing {
    pub fn amount(&self) -> f64 {
        match self {
            OrderSizing::Notional(amount) => *amount,
            OrderSizing::Quantity(shares) => *shares,
        }
    }

    pub fn trade_type(&self) -> TradeType {
        match self {
            OrderSizing::Notional(_) => TradeType::Notional,
            OrderSizing::Quantity(_) => TradeType::Fractional,
        }
    }
}

/// A market order we intend to submit (always MARKET, time-in-force DAY)
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: OrderSide,
    pub sizing: OrderSizing,
    pub client_order_id: Uuid,
}

impl OrderIntent {
    /// Build an intent from optional notional/quantity, exactly one of which must be set
    pub fn new(
        symbol: impl Into<String>,
        side: OrderSide,
        notional: Option<f64>,
        qty: Option<f64>,
    ) -> Result<Self, ExecutionError> {
        let sizing = match (notional, qty) {
            (Some(amount), None) => OrderSizing::Notional(round_to_cents(amount)),
            (None, Some(shares)) => OrderSizing::Quantity(shares),
            (None, None) => {
                return Err(ExecutionError::InvalidSizing(
                    "either qty or notional must be provided".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(ExecutionError::InvalidSizing(
                    "qty and notional are mutually exclusive".to_string(),
                ))
            }
        };

        let amount = sizing.amount();
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ExecutionError::InvalidSizing(format!(
                "order amount must be positive, got {}",
                amount
            )));
        }
        if let OrderSizing::Notional(dollars) = sizing {
            if dollars < MIN_NOTIONAL {
                return Err(ExecutionError::InvalidSizing(format!(
                    "notional must be at least ${:.2}, got ${}",
                    MIN_NOTIONAL, dollars
                )));
            }
        }

        Ok(Self {
            symbol: symbol.into(),
            side,
            sizing,
            client_order_id: Uuid::new_v4(),
        })
    }

    pub fn notional(symbol: impl Into<String>, side: OrderSide, amount: f64) -> Result<Self, ExecutionError> {
        Self::new(symbol, side, Some(amount), None)
    }

    pub fn quantity(symbol: impl Into<String>, side: OrderSide, shares: f64) -> Result<Self, ExecutionError> {
        Self::new(symbol, side, None, Some(shares))
    }
}

/// Broker-reported order status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PendingNew,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
    #[serde(other)]
    Other,
}

impl OrderStatus {
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Filled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::New => "new",
            OrderStatus::PendingNew => "pending_new",
            OrderStatus::Accepted => "accepted",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Expired => "expired",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Our cached view of a submitted order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderHandle {
    pub id: String,
    pub status: OrderStatus,
}

/// Ledger trade type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeType {
    Notional,
    Fractional,
}

/// Terminal outcome of a monitored order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Resolution {
    Filled,
    Cancelled,
}

/// One row of the trade ledger. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub amount: f64,
    pub trade_type: TradeType,
    #[serde(with = "side_upper")]
    pub side: OrderSide,
    #[serde(rename = "status")]
    pub resolution: Resolution,
}

// Ledger stores sides as BUY/SELL while the broker wire format is lowercase
mod side_upper {
    use super::OrderSide;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(side: &OrderSide, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&side.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<OrderSide, D::Error> {
        let raw = String::deserialize(d)?;
        match raw.to_ascii_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(serde::de::Error::custom(format!("unknown side {}", other))),
        }
    }
}

/// Daily bar; only the close is used by the strategy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
}

/// Closing prices ordered oldest to newest
pub fn closing_prices(bars: &[Bar]) -> Vec<f64> {
    let mut sorted: Vec<&Bar> = bars.iter().collect();
    sorted.sort_by_key(|b| b.timestamp);
    sorted.iter().map(|b| b.close).collect()
}

/// Strategy output. `side == None` means no action this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub side: Option<OrderSide>,
    pub multiplier: f64,
}

/// Fresh read-only view of the account
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub status: String,
    pub cash: f64,
    pub fractional_trading_enabled: bool,
}

/// Open position in a symbol
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub qty: f64,
}
