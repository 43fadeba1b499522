//! Reporting windows: the day, in a fixed reference offset, is split into equal
//! closed-open periods starting at local midnight. Threshold records are only
//! valid inside the window in which they were last written.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Timelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    offset: FixedOffset,
    window_hours: u32,
}

impl WindowPolicy {
    pub fn new(utc_offset_hours: i32, window_hours: u32) -> Result<Self> {
        if window_hours == 0 || 24 % window_hours != 0 {
            return Err(anyhow!("window length must divide 24 hours, got {window_hours}"));
        }
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
            .ok_or_else(|| anyhow!("invalid UTC offset: {utc_offset_hours} hours"))?;
        Ok(Self {
            offset,
            window_hours,
        })
    }

    pub fn half_day_utc() -> Self {
        Self {
            offset: Utc.fix(),
            window_hours: 12,
        }
    }

    pub fn current_window(&self, now: DateTime<Utc>) -> ReportingWindow {
        let local = now.with_timezone(&self.offset);
        let index = local.hour() / self.window_hours;
        let local_start = local.date_naive().and_time(NaiveTime::MIN)
            + Duration::hours(i64::from(index * self.window_hours));
        let start = Utc.from_utc_datetime(
            &(local_start - Duration::seconds(i64::from(self.offset.local_minus_utc()))),
        );

        ReportingWindow {
            start,
            end: start + Duration::hours(i64::from(self.window_hours)),
            offset: self.offset,
        }
    }

    pub fn is_stale(&self, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        updated_at < self.current_window(now).start
    }
}

/// `[start, end)` in UTC, remembering the offset it was computed in for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    offset: FixedOffset,
}

impl ReportingWindow {
    /// Local period such as `"00:00 - 12:00"` or `"12:00 - 00:00"`.
    pub fn label(&self) -> String {
        format!(
            "{} - {}",
            self.start.with_timezone(&self.offset).format("%H:%M"),
            self.end.with_timezone(&self.offset).format("%H:%M")
        )
    }
}
