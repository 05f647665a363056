//! Market hours and time control.
//!
//! [`MarketClock`] answers "may we trade now?" for a single venue with a fixed
//! daily session on Monday through Friday. [`Sleeper`] is the source of "now"
//! and of every blocking wait, so the poll loop and the scheduler can run on a
//! simulated clock in tests.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Mutex;

/// Where an instant falls relative to the trading session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    InSession,
    BeforeOpen,
    AfterClose,
    NonTradingDay,
}

/// When the caller should next act
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Now,
    At(DateTime<Tz>),
}

#[derive(Debug, Clone)]
pub struct MarketClock {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

impl MarketClock {
    pub fn new(tz: Tz, open: NaiveTime, close: NaiveTime) -> Self {
        Self { tz, open, close }
    }

    /// NYSE regular session: 09:30-16:00 America/New_York
    pub fn nyse() -> Self {
        Self {
            tz: chrono_tz::America::New_York,
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Weekday indices 0-4 (Monday-Friday) trade; weekends do not
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        date.weekday().num_days_from_monday() < 5
    }

    pub fn phase<T: TimeZone>(&self, now: &DateTime<T>) -> SessionPhase {
        let local = now.with_timezone(&self.tz);

        if !self.is_trading_day(local.date_naive()) {
            return SessionPhase::NonTradingDay;
        }

        let time = local.time();
        if time < self.open {
            SessionPhase::BeforeOpen
        } else if time > self.close {
            SessionPhase::AfterClose
        } else {
            SessionPhase::InSession
        }
    }

    pub fn is_open<T: TimeZone>(&self, now: &DateTime<T>) -> bool {
        self.phase(now) == SessionPhase::InSession
    }

    /// Next instant at which the strategy may run
    pub fn next_wake<T: TimeZone>(&self, now: &DateTime<T>) -> Wake {
        let today = now.with_timezone(&self.tz).date_naive();

        match self.phase(now) {
            SessionPhase::InSession => Wake::Now,
            SessionPhase::BeforeOpen => Wake::At(self.session_open(today)),
            SessionPhase::AfterClose | SessionPhase::NonTradingDay => {
                Wake::At(self.session_open(self.next_trading_day(today)))
            }
        }
    }

    /// Session open on the given local date
    pub fn session_open(&self, date: NaiveDate) -> DateTime<Tz> {
        self.localize(date.and_time(self.open))
    }

    /// First trading day strictly after `date`
    pub fn next_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut next = date + Duration::days(1);
        while !self.is_trading_day(next) {
            next += Duration::days(1);
        }
        next
    }

    /// Same local wall time, `days` trading days later
    pub fn add_trading_days<T: TimeZone>(&self, now: &DateTime<T>, days: u32) -> DateTime<Tz> {
        let local = now.with_timezone(&self.tz);
        let mut date = local.date_naive();
        for _ in 0..days {
            date = self.next_trading_day(date);
        }
        self.localize(date.and_time(local.time()))
    }

    fn localize(&self, naive: NaiveDateTime) -> DateTime<Tz> {
        if let Some(dt) = self.tz.from_local_datetime(&naive).earliest() {
            return dt;
        }
        // Inside a DST gap: the wall time does not exist, take the first valid one after it
        self.tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| self.tz.from_utc_datetime(&naive))
    }
}

impl Default for MarketClock {
    fn default() -> Self {
        Self::nyse()
    }
}

/// Source of the current time and of blocking waits
#[async_trait]
pub trait Sleeper: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: std::time::Duration);

    /// Sleep until `deadline`; returns immediately if it already passed
    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let remaining = (deadline - self.now()).to_std().unwrap_or_default();
        self.sleep(remaining).await;
    }
}

/// Wall clock backed by `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: std::time::Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Simulated clock: sleeping advances time instantly and is recorded.
///
/// Used for dry runs and tests so poll loops and multi-day schedules run
/// without real delay.
#[derive(Debug)]
pub struct ManualSleeper {
    state: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    sleeps: Vec<std::time::Duration>,
}

impl ManualSleeper {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now,
                sleeps: Vec::new(),
            }),
        }
    }

    /// Every duration passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<std::time::Duration> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sleeps
            .clone()
    }

    pub fn sleep_count(&self) -> usize {
        self.sleeps().len()
    }
}

#[async_trait]
impl Sleeper for ManualSleeper {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).now
    }

    async fn sleep(&self, duration: std::time::Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.now += Duration::from_std(duration).unwrap_or_else(|_| Duration::zero());
        state.sleeps.push(duration);
    }
}
