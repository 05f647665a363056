use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::api::{Brokerage, MarketData};
use crate::clock::{MarketClock, Sleeper, Wake};
use crate::config::Settings;
use crate::execution::{ExecutionOutcome, Executor};
use crate::models::{closing_prices, Decision, TradeRecord};
use crate::strategy::Strategy;

/// Cadence and gating options for the trading loop
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    /// Skip the market-hours gate and use `fast_interval` between cycles
    pub quick_test: bool,
    pub cancel_open_orders: bool,
    pub cycle_trading_days: u32,
    pub fast_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            quick_test: false,
            cancel_open_orders: true,
            cycle_trading_days: 2,
            fast_interval: Duration::from_secs(60),
        }
    }
}

impl From<&Settings> for ScheduleConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            quick_test: settings.quick_test,
            cancel_open_orders: settings.cancel_open_orders,
            cycle_trading_days: settings.cycle_trading_days,
            fast_interval: Duration::from_secs(settings.fast_interval_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Traded(TradeRecord),
    NoPosition,
    Hold,
    /// Cycle abandoned; the loop carries on at the next cycle
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub decision: Option<Decision>,
    pub outcome: CycleOutcome,
    pub next_cycle: DateTime<Utc>,
}

/// Result of one loop iteration
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Market closed; slept until this instant
    Waited(DateTime<Utc>),
    Ran(CycleReport),
}

pub struct TradingLoop {
    strategy: Box<dyn Strategy>,
    executor: Executor,
    market_data: Arc<dyn MarketData>,
    broker: Arc<dyn Brokerage>,
    clock: MarketClock,
    sleeper: Arc<dyn Sleeper>,
    schedule: ScheduleConfig,
}

impl TradingLoop {
    pub fn new(
        strategy: Box<dyn Strategy>,
        executor: Executor,
        market_data: Arc<dyn MarketData>,
        broker: Arc<dyn Brokerage>,
        clock: MarketClock,
        sleeper: Arc<dyn Sleeper>,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            strategy,
            executor,
            market_data,
            broker,
            clock,
            sleeper,
            schedule,
        }
    }

    /// Run forever. Callers stop it by dropping the future.
    pub async fn run(&self) {
        tracing::info!(
            "Starting {} loop for {} (every {} trading days{})",
            self.strategy.name(),
            self.executor.symbol(),
            self.schedule.cycle_trading_days,
            if self.schedule.quick_test {
                ", quick test"
            } else {
                ""
            }
        );

        loop {
            self.step().await;
        }
    }

    /// One iteration: wait out a closed market, or run a cycle and sleep until the next
    pub async fn step(&self) -> Step {
        let now = self.sleeper.now();

        if !self.schedule.quick_test {
            if let Wake::At(open) = self.clock.next_wake(&now) {
                let wake = open.with_timezone(&Utc);
                tracing::info!(
                    "Market closed ({:?}). Sleeping until {}",
                    self.clock.phase(&now),
                    open
                );
                self.sleeper.sleep_until(wake).await;
                return Step::Waited(wake);
            }
        }

        let report = self.run_cycle().await;
        match &report.outcome {
            CycleOutcome::Skipped(reason) => tracing::warn!("Cycle skipped: {}", reason),
            outcome => tracing::info!("Cycle finished: {:?}", outcome),
        }

        tracing::info!(
            "Next cycle at {}",
            report.next_cycle.with_timezone(&self.clock.timezone())
        );
        self.sleeper.sleep_until(report.next_cycle).await;
        Step::Ran(report)
    }

    /// Fetch data, decide and execute once. Never fails: problems are reported
    /// as `CycleOutcome::Skipped`.
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = self.sleeper.now();
        let next_cycle = self.next_cycle(started_at);
        let report = |decision, outcome| CycleReport {
            started_at,
            decision,
            outcome,
            next_cycle,
        };

        tracing::info!("Running strategy for {}", self.executor.symbol());

        if self.schedule.cancel_open_orders {
            match self.broker.cancel_all_orders().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Cancelled {} open orders", n),
                Err(e) => tracing::warn!("Failed to cancel open orders: {}", e),
            }
        }

        let long = match self
            .fetch_closes(started_at, self.strategy.long_window())
            .await
        {
            Ok(closes) => closes,
            Err(reason) => return report(None, CycleOutcome::Skipped(reason)),
        };
        let short = match self
            .fetch_closes(started_at, self.strategy.short_window())
            .await
        {
            Ok(closes) => closes,
            Err(reason) => return report(None, CycleOutcome::Skipped(reason)),
        };

        let decision = match self.strategy.decide(&short, &long) {
            Ok(decision) => decision,
            Err(e) => return report(None, CycleOutcome::Skipped(e.to_string())),
        };

        let Some(side) = decision.side else {
            return report(Some(decision), CycleOutcome::Hold);
        };
        tracing::info!(
            "Signal: {} {} (multiplier {})",
            side,
            self.executor.symbol(),
            decision.multiplier
        );

        let outcome = match self.executor.execute(side, decision.multiplier).await {
            Ok(ExecutionOutcome::Resolved(record)) => CycleOutcome::Traded(record),
            Ok(ExecutionOutcome::NoPosition) => CycleOutcome::NoPosition,
            Err(e) => CycleOutcome::Skipped(e.to_string()),
        };
        report(Some(decision), outcome)
    }

    /// When the cycle starting at `started_at` should be followed by the next
    pub fn next_cycle(&self, started_at: DateTime<Utc>) -> DateTime<Utc> {
        if self.schedule.quick_test {
            started_at
                + chrono::Duration::from_std(self.schedule.fast_interval)
                    .unwrap_or_else(|_| chrono::Duration::seconds(60))
        } else {
            self.clock
                .add_trading_days(&started_at, self.schedule.cycle_trading_days)
                .with_timezone(&Utc)
        }
    }

    /// Daily closes over `[now - (window + 1)d, now - 1d]`, oldest first
    async fn fetch_closes(&self, now: DateTime<Utc>, window: usize) -> Result<Vec<f64>, String> {
        let end = now - chrono::Duration::days(1);
        let start = now - chrono::Duration::days(window as i64 + 1);

        let bars = self
            .market_data
            .get_daily_bars(self.executor.symbol(), start, end, window)
            .await
            .map_err(|e| format!("Failed to fetch {}-day bars: {}", window, e))?;

        tracing::debug!("Fetched {} of {} daily bars", bars.len(), window);
        Ok(closing_prices(&bars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AccountConfigurations;
    use crate::clock::ManualSleeper;
    use crate::error::ApiError;
    use crate::execution::MonitorConfig;
    use crate::ledger::TradeLedger;
    use crate::models::{
        AccountSnapshot, Bar, OrderHandle, OrderIntent, OrderSide, OrderStatus, Position, Resolution,
    };
    use crate::strategy::SmaCrossover;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Serves rising prices so the short SMA sits above the long SMA
    #[derive(Default)]
    struct FakeMarket {
        empty: bool,
        requests: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>, usize)>>,
    }

    #[async_trait]
    impl MarketData for FakeMarket {
        async fn get_daily_bars(
            &self,
            _symbol: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<Bar>, ApiError> {
            self.requests.lock().unwrap().push((start, end, limit));
            if self.empty {
                return Ok(Vec::new());
            }
            let origin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            Ok((0..limit)
                .map(|i| {
                    let timestamp = start + chrono::Duration::days(i as i64);
                    Bar {
                        timestamp,
                        close: 100.0 + (timestamp - origin).num_days() as f64,
                    }
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeBroker {
        cancel_all_fails: bool,
        cancel_all_calls: Mutex<u32>,
        submitted: Mutex<Vec<OrderIntent>>,
    }

    #[async_trait]
    impl Brokerage for FakeBroker {
        async fn get_account(&self) -> Result<AccountSnapshot, ApiError> {
            Ok(AccountSnapshot {
                status: "ACTIVE".to_string(),
                cash: 1000.0,
                fractional_trading_enabled: true,
            })
        }

        async fn get_account_configurations(&self) -> Result<AccountConfigurations, ApiError> {
            Ok(AccountConfigurations {
                fractional_trading: true,
            })
        }

        async fn submit_order(&self, intent: &OrderIntent) -> Result<OrderHandle, ApiError> {
            self.submitted.lock().unwrap().push(intent.clone());
            Ok(OrderHandle {
                id: "order-1".to_string(),
                status: OrderStatus::Filled,
            })
        }

        async fn get_order(&self, order_id: &str) -> Result<OrderHandle, ApiError> {
            Ok(OrderHandle {
                id: order_id.to_string(),
                status: OrderStatus::Filled,
            })
        }

        async fn cancel_order(&self, _order_id: &str) -> Result<(), ApiError> {
            Ok(())
        }

        async fn cancel_all_orders(&self) -> Result<usize, ApiError> {
            *self.cancel_all_calls.lock().unwrap() += 1;
            if self.cancel_all_fails {
                return Err(ApiError::Status {
                    status: 500,
                    body: "internal error".to_string(),
                });
            }
            Ok(1)
        }

        async fn get_position(&self, _symbol: &str) -> Result<Option<Position>, ApiError> {
            Ok(None)
        }

        async fn get_all_positions(&self) -> Result<Vec<Position>, ApiError> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        trading_loop: TradingLoop,
        broker: Arc<FakeBroker>,
        market: Arc<FakeMarket>,
        sleeper: Arc<ManualSleeper>,
        ledger: TradeLedger,
        _dir: tempfile::TempDir,
    }

    fn harness(
        now: DateTime<Utc>,
        broker: FakeBroker,
        market: FakeMarket,
        schedule: ScheduleConfig,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TradeLedger::new(dir.path().join("trade_log.csv"));
        let broker = Arc::new(broker);
        let market = Arc::new(market);
        let sleeper = Arc::new(ManualSleeper::starting_at(now));

        let executor = Executor::new(
            broker.clone(),
            sleeper.clone(),
            ledger.clone(),
            "VOO",
            MonitorConfig::default(),
        );
        let trading_loop = TradingLoop::new(
            Box::new(SmaCrossover::default()),
            executor,
            market.clone(),
            broker.clone(),
            MarketClock::nyse(),
            sleeper.clone(),
            schedule,
        );

        Harness {
            trading_loop,
            broker,
            market,
            sleeper,
            ledger,
            _dir: dir,
        }
    }

    // Wednesday 2024-03-13 10:00 EDT
    fn wednesday_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 13, 14, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_cycle_buys_and_schedules_two_trading_days_out() {
        let now = wednesday_morning();
        let h = harness(
            now,
            FakeBroker::default(),
            FakeMarket::default(),
            ScheduleConfig::default(),
        );

        let report = h.trading_loop.run_cycle().await;

        let CycleOutcome::Traded(record) = &report.outcome else {
            panic!("expected a trade, got {:?}", report.outcome);
        };
        assert_eq!(record.side, OrderSide::Buy);
        assert_eq!(record.amount, 750.0);
        assert_eq!(record.resolution, Resolution::Filled);
        assert_eq!(h.ledger.read_all().unwrap().len(), 1);
        assert_eq!(*h.broker.cancel_all_calls.lock().unwrap(), 1);

        // Friday 10:00 EDT
        assert_eq!(
            report.next_cycle,
            Utc.with_ymd_and_hms(2024, 3, 15, 14, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_cycle_requests_trailing_windows() {
        let now = wednesday_morning();
        let h = harness(
            now,
            FakeBroker::default(),
            FakeMarket::default(),
            ScheduleConfig::default(),
        );

        h.trading_loop.run_cycle().await;

        let requests = h.market.requests.lock().unwrap().clone();
        let yesterday = now - chrono::Duration::days(1);
        assert_eq!(
            requests,
            vec![
                (now - chrono::Duration::days(21), yesterday, 20),
                (now - chrono::Duration::days(6), yesterday, 5),
            ]
        );
    }

    #[tokio::test]
    async fn test_insufficient_data_skips_cycle() {
        let h = harness(
            wednesday_morning(),
            FakeBroker::default(),
            FakeMarket {
                empty: true,
                ..Default::default()
            },
            ScheduleConfig::default(),
        );

        let report = h.trading_loop.run_cycle().await;

        assert!(matches!(report.outcome, CycleOutcome::Skipped(ref r) if r.contains("Insufficient data")));
        assert!(report.decision.is_none());
        assert!(h.broker.submitted.lock().unwrap().is_empty());
        assert!(h.ledger.read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_all_failure_does_not_abort_cycle() {
        let h = harness(
            wednesday_morning(),
            FakeBroker {
                cancel_all_fails: true,
                ..Default::default()
            },
            FakeMarket::default(),
            ScheduleConfig::default(),
        );

        let report = h.trading_loop.run_cycle().await;

        assert!(matches!(report.outcome, CycleOutcome::Traded(_)));
    }

    #[tokio::test]
    async fn test_closed_market_sleeps_until_next_open() {
        // Saturday 2024-03-16 noon UTC
        let saturday = Utc.with_ymd_and_hms(2024, 3, 16, 12, 0, 0).unwrap();
        let h = harness(
            saturday,
            FakeBroker::default(),
            FakeMarket::default(),
            ScheduleConfig::default(),
        );

        let step = h.trading_loop.step().await;

        // Monday 09:30 EDT
        let monday_open = Utc.with_ymd_and_hms(2024, 3, 18, 13, 30, 0).unwrap();
        assert_eq!(step, Step::Waited(monday_open));
        assert_eq!(h.sleeper.now(), monday_open);
        assert!(h.market.requests.lock().unwrap().is_empty());
        assert_eq!(*h.broker.cancel_all_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_step_runs_cycle_then_sleeps_until_next() {
        let h = harness(
            wednesday_morning(),
            FakeBroker::default(),
            FakeMarket::default(),
            ScheduleConfig::default(),
        );

        let Step::Ran(report) = h.trading_loop.step().await else {
            panic!("market is open, cycle should run");
        };

        assert_eq!(h.sleeper.now(), report.next_cycle);
    }

    #[tokio::test]
    async fn test_quick_test_ignores_market_hours() {
        let saturday = Utc.with_ymd_and_hms(2024, 3, 16, 12, 0, 0).unwrap();
        let h = harness(
            saturday,
            FakeBroker::default(),
            FakeMarket::default(),
            ScheduleConfig {
                quick_test: true,
                ..Default::default()
            },
        );

        let Step::Ran(report) = h.trading_loop.step().await else {
            panic!("quick test should run regardless of the session");
        };

        assert_eq!(report.next_cycle, saturday + chrono::Duration::seconds(60));
        assert_eq!(h.broker.submitted.lock().unwrap().len(), 1);
    }
}
