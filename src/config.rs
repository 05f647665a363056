//! Runtime settings.
//!
//! Layered lowest to highest: built-in defaults, an optional TOML file,
//! `EQUITYBOT_*` environment variables, then command-line flags.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use chrono_tz::Tz;
use clap::Parser;
use serde::Deserialize;

use crate::api::AlpacaCredentials;
use crate::clock::MarketClock;
use crate::error::ConfigError;
use crate::execution::MonitorConfig;
use crate::ledger::DEFAULT_LEDGER_PATH;
use crate::strategy::SmaCrossoverConfig;

const DEFAULT_CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "EQUITYBOT";

/// Automated SMA crossover trading for a single equity.
#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Symbol to trade (e.g. "VOO")
    #[arg(long)]
    pub symbol: Option<String>,

    /// Trade against the live account instead of paper
    #[arg(long)]
    pub live: bool,

    /// Ignore market hours and run a cycle every minute (always paper)
    #[arg(long)]
    pub quick_test: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Seconds to wait for a fill before cancelling
    #[arg(long)]
    pub max_wait: Option<u64>,

    /// Path to a TOML settings file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    pub timezone: String,
    /// Local session open, HH:MM
    pub open: String,
    /// Local session close, HH:MM
    pub close: String,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            timezone: "America/New_York".to_string(),
            open: "09:30".to_string(),
            close: "16:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub symbol: String,
    pub paper: bool,
    /// Minimum cash balance required at startup
    pub min_cash: f64,
    pub max_wait_secs: u64,
    pub poll_interval_secs: u64,
    pub log_level: String,
    pub quick_test: bool,
    pub cancel_open_orders: bool,
    /// Trading days between strategy cycles
    pub cycle_trading_days: u32,
    /// Cycle interval in quick-test mode
    pub fast_interval_secs: u64,
    pub ledger_path: PathBuf,
    pub strategy: SmaCrossoverConfig,
    pub market: MarketSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbol: "VOO".to_string(),
            paper: true,
            min_cash: 0.0,
            max_wait_secs: 300,
            poll_interval_secs: 60,
            log_level: "info".to_string(),
            quick_test: false,
            cancel_open_orders: true,
            cycle_trading_days: 2,
            fast_interval_secs: 60,
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            strategy: SmaCrossoverConfig::default(),
            market: MarketSettings::default(),
        }
    }
}

impl Settings {
    /// Load from file and process environment, apply CLI overrides, validate
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut settings = Self::from_sources(cli.config.as_deref(), None)?;
        settings.apply_cli(cli);
        settings.validate()?;
        Ok(settings)
    }

    /// Build from the file and environment layers only.
    ///
    /// `env` replaces the process environment when given.
    pub fn from_sources(
        file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let builder = config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        Ok(builder.try_deserialize::<Settings>()?)
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(symbol) = &cli.symbol {
            self.symbol = symbol.clone();
        }
        if cli.live {
            self.paper = false;
        }
        if cli.quick_test {
            self.quick_test = true;
        }
        if cli.debug {
            self.log_level = "debug".to_string();
        }
        if let Some(max_wait) = cli.max_wait {
            self.max_wait_secs = max_wait;
        }

        // Quick-test cycles ignore market hours, never let them touch real money
        if self.quick_test {
            self.paper = true;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Validation("symbol must not be empty".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.fast_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "fast_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.cycle_trading_days == 0 {
            return Err(ConfigError::Validation(
                "cycle_trading_days must be at least 1".to_string(),
            ));
        }
        if !self.min_cash.is_finite() || self.min_cash < 0.0 {
            return Err(ConfigError::Validation(format!(
                "min_cash must be a non-negative amount, got {}",
                self.min_cash
            )));
        }

        let strategy = &self.strategy;
        if strategy.short_window == 0 || strategy.long_window == 0 {
            return Err(ConfigError::Validation(
                "strategy windows must be greater than 0".to_string(),
            ));
        }
        if strategy.short_window > strategy.long_window {
            return Err(ConfigError::Validation(format!(
                "short_window ({}) must not exceed long_window ({})",
                strategy.short_window, strategy.long_window
            )));
        }
        strategy
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        self.market_clock()?;
        Ok(())
    }

    pub fn market_clock(&self) -> Result<MarketClock, ConfigError> {
        let tz: Tz = self.market.timezone.parse().map_err(|e| {
            ConfigError::Validation(format!("invalid timezone {}: {}", self.market.timezone, e))
        })?;
        let open = parse_session_time("market.open", &self.market.open)?;
        let close = parse_session_time("market.close", &self.market.close)?;
        if open >= close {
            return Err(ConfigError::Validation(format!(
                "market.open ({}) must be before market.close ({})",
                self.market.open, self.market.close
            )));
        }
        Ok(MarketClock::new(tz, open, close))
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }

    /// Default `tracing` directive when `RUST_LOG` is unset
    pub fn log_filter(&self) -> String {
        format!("equitybot={}", self.log_level)
    }

    /// API keys for the account selected by `paper`, read from the environment
    pub fn credentials(&self) -> Result<AlpacaCredentials, ConfigError> {
        self.credentials_from(|name| std::env::var(name).ok())
    }

    pub fn credentials_from<F>(&self, lookup: F) -> Result<AlpacaCredentials, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (key_var, secret_var) = if self.paper {
            ("PAPER_ALPACA_API_KEY_ID", "PAPER_ALPACA_API_SECRET_KEY")
        } else {
            ("ALPACA_API_KEY_ID", "ALPACA_API_SECRET_KEY")
        };

        let read = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingCredential(name))
        };

        Ok(AlpacaCredentials {
            api_key: read(key_var)?,
            secret_key: read(secret_var)?,
        })
    }
}

fn parse_session_time(name: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|e| ConfigError::Validation(format!("invalid {} {:?}: {}", name, value, e)))
}
