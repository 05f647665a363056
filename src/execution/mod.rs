// Order execution: sizing, submission and fill monitoring
pub mod executor;
pub mod monitor;

pub use executor::{notional_for, quantity_for, ExecutionOutcome, Executor};
pub use monitor::{next_state, MonitorConfig, MonitorReport, OrderMonitor, PollState};
