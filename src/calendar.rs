//! Exchange-local trading calendar.
//!
//! Premarket and session deadlines are anchored to the exchange's wall clock,
//! so session dates and deadlines are always computed in the exchange
//! timezone rather than in UTC.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy)]
pub struct TradingCalendar {
    tz: Tz,
}

impl TradingCalendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// US equities (NYSE / Nasdaq)
    pub fn new_york() -> Self {
        Self::new(chrono_tz::America::New_York)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Exchange-local calendar date of an instant
    pub fn session_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.tz).date_naive()
    }

    pub fn current_session_date(&self) -> NaiveDate {
        self.session_date(self.now())
    }

    /// Has the exchange-local date moved past `since`?
    pub fn is_new_session(&self, since: NaiveDate) -> bool {
        self.is_new_session_at(since, self.now())
    }

    pub fn is_new_session_at(&self, since: NaiveDate, at: DateTime<Utc>) -> bool {
        self.session_date(at) != since
    }

    /// UTC instant of an exchange-local wall-clock time on `date`
    pub fn local_time_on(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = date.and_time(time);
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            // Spring-forward gap: the wall time does not exist, use the hour after
            LocalResult::None => self
                .tz
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
        }
    }

    /// Today's (exchange-local) deadline at `time`, as seen from `at`
    pub fn deadline(&self, at: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
        self.local_time_on(self.session_date(at), time)
    }

    /// "HH:MM:SS TZ" for log lines and notifications
    pub fn format_local(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.tz).format("%H:%M:%S %Z").to_string()
    }
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::new_york()
    }
}

/// Parse "HH:MM" or "HH:MM:SS"
pub fn parse_clock(raw: &str) -> anyhow::Result<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|e| anyhow::anyhow!("invalid time of day '{}': {}", raw, e))
}
