use std::time::Duration;

use crate::api::Brokerage;
use crate::clock::Sleeper;
use crate::models::{OrderHandle, OrderStatus};

/// Poll state machine for a submitted order. `Filled` and `TimedOut` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Pending,
    Filled,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_wait: Duration::from_secs(300),
        }
    }
}

/// Transition from `Pending` given the latest status and time waited so far
pub fn next_state(status: OrderStatus, elapsed: Duration, max_wait: Duration) -> PollState {
    if status.is_filled() {
        PollState::Filled
    } else if elapsed >= max_wait {
        PollState::TimedOut
    } else {
        PollState::Pending
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorReport {
    pub state: PollState,
    /// Last status seen from the broker
    pub handle: OrderHandle,
    pub polls: u32,
    pub cancel_failed: bool,
}

/// Drives one order from submission to a terminal state
pub struct OrderMonitor<'a> {
    broker: &'a dyn Brokerage,
    sleeper: &'a dyn Sleeper,
    config: MonitorConfig,
}

impl<'a> OrderMonitor<'a> {
    pub fn new(broker: &'a dyn Brokerage, sleeper: &'a dyn Sleeper, config: MonitorConfig) -> Self {
        Self {
            broker,
            sleeper,
            config,
        }
    }

    /// Poll until filled or `max_wait` has elapsed; on timeout the order is
    /// cancelled best-effort.
    pub async fn run(&self, submitted: OrderHandle) -> MonitorReport {
        tracing::info!("Monitoring order {} ...", submitted.id);

        let started = self.sleeper.now();
        let mut handle = submitted;
        let mut polls = 0u32;

        loop {
            let elapsed = (self.sleeper.now() - started).to_std().unwrap_or_default();

            match next_state(handle.status, elapsed, self.config.max_wait) {
                PollState::Pending => {
                    self.sleeper.sleep(self.config.poll_interval).await;
                    polls += 1;

                    match self.broker.get_order(&handle.id).await {
                        Ok(latest) => {
                            tracing::info!("Order status: {}", latest.status);
                            handle = latest;
                        }
                        Err(e) => {
                            // Counts as still unfilled; the elapsed clock keeps the wait bounded
                            tracing::warn!("Failed to poll order {}: {}", handle.id, e);
                        }
                    }
                }
                PollState::Filled => {
                    return MonitorReport {
                        state: PollState::Filled,
                        handle,
                        polls,
                        cancel_failed: false,
                    };
                }
                PollState::TimedOut => {
                    tracing::warn!(
                        "Order {} not filled after {:?} (last status: {}). Cancelling.",
                        handle.id,
                        elapsed,
                        handle.status
                    );

                    let cancel_failed = match self.broker.cancel_order(&handle.id).await {
                        Ok(()) => false,
                        Err(e) => {
                            tracing::warn!("Failed to cancel order {}: {}", handle.id, e);
                            true
                        }
                    };

                    return MonitorReport {
                        state: PollState::TimedOut,
                        handle,
                        polls,
                        cancel_failed,
                    };
                }
            }
        }
    }
}
