//! Market session calendar

use crate::config::MonitorConfig;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};

/// Regular trading hours in UTC on a fixed set of weekdays
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSession {
    open: NaiveTime,
    close: NaiveTime,
    days: Vec<Weekday>,
}

impl MarketSession {
    pub fn new(open: NaiveTime, close: NaiveTime, days: Vec<Weekday>) -> Self {
        Self { open, close, days }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.session_open_utc,
            config.session_close_utc,
            config.trading_days.clone(),
        )
    }

    pub fn is_trading_day(&self, now: DateTime<Utc>) -> bool {
        self.days.contains(&now.weekday())
    }

    /// Whether `now` falls inside regular hours
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let time = now.time();
        self.is_trading_day(now) && time >= self.open && time < self.close
    }

    /// Today's close, if today is a trading day
    pub fn close_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.is_trading_day(now) {
            return None;
        }
        Some(now.date_naive().and_time(self.close).and_utc())
    }

    /// Whether `now` is within `minutes_before` of (or past) today's close
    pub fn in_eod_window(&self, now: DateTime<Utc>, minutes_before: u32) -> bool {
        self.close_at(now)
            .map(|close| now >= close - Duration::minutes(i64::from(minutes_before)))
            .unwrap_or(false)
    }
}
