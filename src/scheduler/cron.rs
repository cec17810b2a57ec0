//! Cron expression evaluation
//!
//! Five fields (minute, hour, day-of-month, month, day-of-week) with `*`,
//! lists, ranges and steps. Minute resolution, day-of-week 0-6 with 0 =
//! Sunday; when both day fields are restricted either one matching fires
//! (classic Vixie behavior). Evaluation is a pure function of expression
//! and reference time - no wall clock in here.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::error::{Error, Result};

/// Search horizon for the next firing (four years covers leap days).
const MAX_SCAN_MINUTES: i64 = 4 * 366 * 24 * 60;

/// Parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronExpr {
    source: String,
    minutes: Vec<bool>,
    hours: Vec<bool>,
    days_of_month: Vec<bool>,
    months: Vec<bool>,
    days_of_week: Vec<bool>,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::Config(format!(
                "cron expression needs 5 fields, got {}: '{expr}'",
                fields.len()
            )));
        }
        let minutes = parse_field(fields[0], 0, 59)?;
        let hours = parse_field(fields[1], 0, 23)?;
        let days_of_month = parse_field(fields[2], 1, 31)?;
        let months = parse_field(fields[3], 1, 12)?;
        let days_of_week = parse_field(fields[4], 0, 6)?;
        Ok(Self {
            source: expr.to_string(),
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the minute containing `t` matches.
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        if !self.minutes[t.minute() as usize] || !self.hours[t.hour() as usize] {
            return false;
        }
        if !self.months[t.month() as usize - 1] {
            return false;
        }
        let dom_match = self.days_of_month[t.day() as usize - 1];
        let dow_match = self.days_of_week[t.weekday().num_days_from_sunday() as usize];
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom_match || dow_match,
            (true, false) => dom_match,
            (false, true) => dow_match,
            (false, false) => true,
        }
    }

    /// First matching minute strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = truncate_to_minute(after) + Duration::minutes(1);
        for _ in 0..MAX_SCAN_MINUTES {
            if self.matches(t) {
                return Some(t);
            }
            // Skip whole non-matching hours and months cheaply
            if !self.months[t.month() as usize - 1] {
                t = start_of_next_month(t);
                continue;
            }
            if !self.hours[t.hour() as usize] {
                t = truncate_to_minute(t + Duration::hours(1))
                    - Duration::minutes(t.minute() as i64);
                continue;
            }
            t += Duration::minutes(1);
        }
        None
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t - Duration::seconds(t.second() as i64)
        - Duration::nanoseconds(t.timestamp_subsec_nanos() as i64)
}

fn start_of_next_month(t: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    chrono::NaiveDate::from_ymd_opt(year, month, 1)
        .expect("valid first-of-month")
        .and_hms_opt(0, 0, 0)
        .expect("valid midnight")
        .and_utc()
}

/// Parse one field into a membership table over [lo, hi].
fn parse_field(field: &str, lo: u32, hi: u32) -> Result<Vec<bool>> {
    let size = (hi + 1) as usize;
    let mut set = vec![false; size];
    for part in field.split(',') {
        if part.is_empty() {
            return Err(Error::Config(format!("empty cron list item in '{field}'")));
        }
        let (range_part, step) = match part.split_once('/') {
            None => (part, 1u32),
            Some((r, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| Error::Config(format!("bad cron step: '{part}'")))?;
                if step == 0 {
                    return Err(Error::Config(format!("zero cron step: '{part}'")));
                }
                (r, step)
            }
        };
        let (start, end) = if range_part == "*" {
            (lo, hi)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let a: u32 = a
                .parse()
                .map_err(|_| Error::Config(format!("bad cron range: '{part}'")))?;
            let b: u32 = b
                .parse()
                .map_err(|_| Error::Config(format!("bad cron range: '{part}'")))?;
            (a, b)
        } else {
            let v: u32 = range_part
                .parse()
                .map_err(|_| Error::Config(format!("bad cron value: '{part}'")))?;
            // A bare value with a step ("3/5") spans to the field maximum
            if step > 1 {
                (v, hi)
            } else {
                (v, v)
            }
        };
        if start < lo || end > hi || start > end {
            return Err(Error::Config(format!(
                "cron value out of range [{lo}, {hi}]: '{part}'"
            )));
        }
        let mut v = start;
        while v <= end {
            set[v as usize] = true;
            v += step;
        }
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn every_five_minutes_from_mid_minute() {
        let cron = CronExpr::parse("*/5 * * * *").unwrap();
        let next = cron.next_after(at(2026, 3, 10, 12, 2, 30)).unwrap();
        assert_eq!(next, at(2026, 3, 10, 12, 5, 0));
        let after = cron.next_after(next).unwrap();
        assert_eq!(after, at(2026, 3, 10, 12, 10, 0));
    }

    #[test]
    fn next_is_strictly_in_the_future() {
        let cron = CronExpr::parse("0 * * * *").unwrap();
        let t = at(2026, 1, 1, 9, 0, 0);
        assert!(cron.matches(t));
        assert_eq!(cron.next_after(t).unwrap(), at(2026, 1, 1, 10, 0, 0));
    }

    #[test]
    fn next_agrees_with_minute_by_minute_scan() {
        let exprs = ["*/7 3-5 * * *", "30 2 * * *", "0 0 1 * *", "15 8 * * 1-5"];
        for expr in exprs {
            let cron = CronExpr::parse(expr).unwrap();
            let start = at(2026, 2, 27, 22, 41, 10);
            let next = cron.next_after(start).unwrap();
            // Brute scan
            let mut t = truncate_to_minute(start) + Duration::minutes(1);
            while !cron.matches(t) {
                t += Duration::minutes(1);
            }
            assert_eq!(next, t, "{expr}");
            assert!(next > start);
        }
    }

    #[test]
    fn dom_and_dow_fire_on_either_when_both_restricted() {
        // 1st of the month OR Mondays at 00:00
        let cron = CronExpr::parse("0 0 1 * 1").unwrap();
        // 2026-03-02 is a Monday, not the 1st
        assert!(cron.matches(at(2026, 3, 2, 0, 0, 0)));
        // 2026-03-01 is a Sunday, the 1st
        assert!(cron.matches(at(2026, 3, 1, 0, 0, 0)));
        assert!(!cron.matches(at(2026, 3, 3, 0, 0, 0)));
    }

    #[test]
    fn sunday_is_zero() {
        let cron = CronExpr::parse("0 12 * * 0").unwrap();
        // 2026-03-01 is a Sunday
        assert!(cron.matches(at(2026, 3, 1, 12, 0, 0)));
        assert!(!cron.matches(at(2026, 3, 2, 12, 0, 0)));
    }

    #[test]
    fn month_rollover() {
        let cron = CronExpr::parse("0 0 1 * *").unwrap();
        let next = cron.next_after(at(2026, 1, 31, 23, 59, 0)).unwrap();
        assert_eq!(next, at(2026, 2, 1, 0, 0, 0));
    }

    #[test]
    fn february_30_never_fires_but_terminates() {
        let cron = CronExpr::parse("0 0 30 2 *").unwrap();
        assert!(cron.next_after(at(2026, 1, 1, 0, 0, 0)).is_none());
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in [
            "* * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 7",
            "a * * * *",
            "*/0 * * * *",
            "5-2 * * * *",
        ] {
            assert!(CronExpr::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn lists_ranges_and_steps_combine() {
        let cron = CronExpr::parse("0,15,30-40/5 9 * * *").unwrap();
        for minute in [0u32, 15, 30, 35, 40] {
            assert!(cron.matches(at(2026, 6, 1, 9, minute, 0)), "{minute}");
        }
        for minute in [5u32, 31, 45] {
            assert!(!cron.matches(at(2026, 6, 1, 9, minute, 0)), "{minute}");
        }
    }
}
