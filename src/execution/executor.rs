use std::sync::Arc;

use crate::api::Brokerage;
use crate::clock::Sleeper;
use crate::error::ExecutionError;
use crate::execution::monitor::{MonitorConfig, OrderMonitor, PollState};
use crate::ledger::TradeLedger;
use crate::models::{round_to_cents, OrderIntent, OrderSide, Resolution, TradeRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Order reached a terminal state and was written to the ledger
    Resolved(TradeRecord),
    /// SELL requested while flat; nothing submitted
    NoPosition,
}

/// Dollar amount to spend on a BUY, in whole cents
pub fn notional_for(cash: f64, multiplier: f64) -> f64 {
    round_to_cents(cash * multiplier)
}

/// Shares to sell out of an open position
pub fn quantity_for(position_qty: f64, multiplier: f64) -> f64 {
    position_qty * multiplier
}

/// Turns a decision into one market order, monitors it and records the result
pub struct Executor {
    broker: Arc<dyn Brokerage>,
    sleeper: Arc<dyn Sleeper>,
    ledger: TradeLedger,
    symbol: String,
    monitor: MonitorConfig,
}

impl Executor {
    pub fn new(
        broker: Arc<dyn Brokerage>,
        sleeper: Arc<dyn Sleeper>,
        ledger: TradeLedger,
        symbol: impl Into<String>,
        monitor: MonitorConfig,
    ) -> Self {
        Self {
            broker,
            sleeper,
            ledger,
            symbol: symbol.into(),
            monitor,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    /// Size an order from fresh account/position state. `None` when selling while flat.
    pub async fn size_order(
        &self,
        side: OrderSide,
        multiplier: f64,
    ) -> Result<Option<OrderIntent>, ExecutionError> {
        match side {
            OrderSide::Buy => {
                let account = self
                    .broker
                    .get_account()
                    .await
                    .map_err(ExecutionError::Account)?;
                let notional = notional_for(account.cash, multiplier);
                tracing::debug!(
                    "Sizing BUY: cash ${:.2} x {} = ${:.2}",
                    account.cash,
                    multiplier,
                    notional
                );
                OrderIntent::notional(&self.symbol, side, notional).map(Some)
            }
            OrderSide::Sell => {
                let position = self
                    .broker
                    .get_position(&self.symbol)
                    .await
                    .map_err(ExecutionError::Account)?;

                match position {
                    Some(position) if position.qty > 0.0 => {
                        let qty = quantity_for(position.qty, multiplier);
                        tracing::debug!(
                            "Sizing SELL: {} shares x {} = {}",
                            position.qty,
                            multiplier,
                            qty
                        );
                        OrderIntent::quantity(&self.symbol, side, qty).map(Some)
                    }
                    _ => Ok(None),
                }
            }
        }
    }

    /// Size, submit and monitor one order, then append exactly one ledger row
    pub async fn execute(
        &self,
        side: OrderSide,
        multiplier: f64,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let intent = match self.size_order(side, multiplier).await? {
            Some(intent) => intent,
            None => {
                tracing::info!("No open {} position to sell. No action taken.", self.symbol);
                return Ok(ExecutionOutcome::NoPosition);
            }
        };

        let handle = self
            .broker
            .submit_order(&intent)
            .await
            .map_err(ExecutionError::Submission)?;
        tracing::info!(
            "Order placed: {} {} {:?} (id {}, client id {}, status {})",
            intent.side,
            intent.symbol,
            intent.sizing,
            handle.id,
            intent.client_order_id,
            handle.status
        );

        let report = OrderMonitor::new(self.broker.as_ref(), self.sleeper.as_ref(), self.monitor)
            .run(handle)
            .await;

        let resolution = match report.state {
            PollState::Filled => Resolution::Filled,
            PollState::TimedOut => Resolution::Cancelled,
            PollState::Pending => {
                return Err(ExecutionError::Monitor(format!(
                    "order {} still pending after monitoring",
                    report.handle.id
                )))
            }
        };

        let record = TradeRecord {
            timestamp: self.sleeper.now(),
            symbol: intent.symbol.clone(),
            amount: intent.sizing.amount(),
            trade_type: intent.sizing.trade_type(),
            side: intent.side,
            resolution,
        };
        self.ledger.append(&record)?;

        tracing::info!("Final order status: {:?}", resolution);
        Ok(ExecutionOutcome::Resolved(record))
    }
}
