//! Trading-window schedule.
//!
//! Entry is blocked outside `[start, end]` in the configured IANA
//! timezone, with support for overnight windows where start > end.
//! Near the end of the window, open positions are closed early.

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use spotmm_core::StrategyParams;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct TradingSchedule {
    enabled: bool,
    start: NaiveTime,
    end: NaiveTime,
    tz: Tz,
    trade_on_weekends: bool,
    close_before_end_minutes: i64,
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let (h, m) = s.split_once(':')?;
    NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
}

impl TradingSchedule {
    /// Build from strategy params. Unparseable times or timezone
    /// disable the schedule (fail open), logged once here.
    pub fn from_params(params: &StrategyParams) -> Self {
        let tz: Option<Tz> = params.trading_timezone.parse().ok();
        let start = parse_hhmm(&params.trading_start_time);
        let end = parse_hhmm(&params.trading_end_time);

        let enabled = if params.trading_schedule_enabled {
            match (tz, start, end) {
                (Some(_), Some(_), Some(_)) => true,
                _ => {
                    warn!(
                        tz = %params.trading_timezone,
                        start = %params.trading_start_time,
                        end = %params.trading_end_time,
                        "unparseable trading schedule, failing open"
                    );
                    false
                }
            }
        } else {
            false
        };

        Self {
            enabled,
            start: start.unwrap_or(NaiveTime::MIN),
            end: end.unwrap_or(NaiveTime::MIN),
            tz: tz.unwrap_or(chrono_tz::UTC),
            trade_on_weekends: params.trade_on_weekends,
            close_before_end_minutes: params.close_before_end_minutes,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether entries are allowed at `now`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }
        let local = now.with_timezone(&self.tz);

        if !self.trade_on_weekends {
            let weekday = local.weekday().num_days_from_monday();
            if weekday >= 5 {
                return false;
            }
        }

        let t = local.time();
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            // Overnight window, e.g. 22:00-02:00.
            t >= self.start || t <= self.end
        }
    }

    /// Minutes until the window end, from `now`. The end is today in
    /// the schedule timezone, or tomorrow once it has passed.
    pub fn minutes_until_end(&self, now: DateTime<Utc>) -> Option<f64> {
        if !self.enabled {
            return None;
        }
        let local = now.with_timezone(&self.tz);
        let mut end_date = local.date_naive();
        if local.time() > self.end {
            end_date = end_date.succ_opt()?;
        }
        let end_local = self
            .tz
            .from_local_datetime(&end_date.and_time(self.end))
            .earliest()?;
        Some((end_local - local).num_seconds() as f64 / 60.0)
    }

    /// Positions should be market-closed this close to the end.
    pub fn should_close_before_end(&self, now: DateTime<Utc>) -> bool {
        match self.minutes_until_end(now) {
            Some(minutes) => minutes <= self.close_before_end_minutes as f64,
            None => false,
        }
    }
}
