// SPDX-License-Identifier: MPL-2.0

//! Human-readable timestamps.

use chrono::{DateTime, Datelike, Timelike, Utc};

const MINUTES_IN_DAY: i64 = 1440;
const MINUTES_IN_ALMOST_TWO_DAYS: i64 = 2520;
const MINUTES_IN_MONTH: i64 = 43200;
const MINUTES_IN_TWO_MONTHS: i64 = 86400;

fn parse(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if ts.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// Whole calendar months from `earlier` to `later`.
fn calendar_months(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    let mut months = (later.year() as i64 - earlier.year() as i64) * 12
        + (later.month() as i64 - earlier.month() as i64);
    let later_key = (later.day(), later.num_seconds_from_midnight());
    let earlier_key = (earlier.day(), earlier.num_seconds_from_midnight());
    if months > 0 && later_key < earlier_key {
        months -= 1;
    }
    months
}

/// Distance between two instants in words, e.g. "about 2 hours".
pub fn distance(a: DateTime<Utc>, b: DateTime<Utc>) -> String {
    let (earlier, later) = if a <= b { (a, b) } else { (b, a) };
    let seconds = (later - earlier).num_seconds();
    let minutes = (seconds as f64 / 60.0).round() as i64;

    if minutes < 1 {
        return "less than a minute".to_string();
    }
    if minutes < 45 {
        return plural(minutes, "minute");
    }
    if minutes < 90 {
        return "about 1 hour".to_string();
    }
    if minutes < MINUTES_IN_DAY {
        let hours = (minutes as f64 / 60.0).round() as i64;
        return format!("about {}", plural(hours, "hour"));
    }
    if minutes < MINUTES_IN_ALMOST_TWO_DAYS {
        return "1 day".to_string();
    }
    if minutes < MINUTES_IN_MONTH {
        let days = (minutes as f64 / MINUTES_IN_DAY as f64).round() as i64;
        return plural(days, "day");
    }
    if minutes < MINUTES_IN_TWO_MONTHS {
        let months = (minutes as f64 / MINUTES_IN_MONTH as f64).round() as i64;
        return format!("about {}", plural(months, "month"));
    }

    let months = calendar_months(earlier, later);
    if months < 12 {
        let nearest = (minutes as f64 / MINUTES_IN_MONTH as f64).round() as i64;
        return plural(nearest, "month");
    }

    let years = months / 12;
    match months % 12 {
        0..=2 => format!("about {}", plural(years, "year")),
        3..=8 => format!("over {}", plural(years, "year")),
        _ => format!("almost {}", plural(years + 1, "year")),
    }
}

/// Relative time with a suffix: "5 minutes ago", "in about 1 hour".
pub fn time_ago_from(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let words = distance(ts, now);
    if ts > now {
        format!("in {words}")
    } else {
        format!("{words} ago")
    }
}

/// Like [`time_ago_from`] for a stored RFC 3339 string; "Unknown" when it
/// does not parse.
pub fn time_ago(ts: &str, now: DateTime<Utc>) -> String {
    match parse(ts) {
        Some(dt) => time_ago_from(dt, now),
        None => "Unknown".to_string(),
    }
}

/// Short date, e.g. "Jan 11, 2026". Empty when the input does not parse.
pub fn format_date(ts: &str) -> String {
    parse(ts)
        .map(|dt| dt.format("%b %-d, %Y").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 11, 12, 0, 0).unwrap()
    }

    fn ago(d: Duration) -> String {
        time_ago_from(now() - d, now())
    }

    #[test]
    fn test_minutes_and_hours() {
        assert_eq!(ago(Duration::seconds(10)), "less than a minute ago");
        assert_eq!(ago(Duration::seconds(50)), "1 minute ago");
        assert_eq!(ago(Duration::minutes(5)), "5 minutes ago");
        assert_eq!(ago(Duration::minutes(60)), "about 1 hour ago");
        assert_eq!(ago(Duration::hours(2)), "about 2 hours ago");
    }

    #[test]
    fn test_days_months_years() {
        assert_eq!(ago(Duration::hours(30)), "1 day ago");
        assert_eq!(ago(Duration::days(3)), "3 days ago");
        assert_eq!(ago(Duration::days(35)), "about 1 month ago");
        assert_eq!(ago(Duration::days(120)), "4 months ago");
        assert_eq!(ago(Duration::days(400)), "about 1 year ago");
        assert_eq!(ago(Duration::days(365 + 180)), "over 1 year ago");
        assert_eq!(ago(Duration::days(365 + 330)), "almost 2 years ago");
    }

    #[test]
    fn test_future_gets_in_prefix() {
        assert_eq!(
            time_ago_from(now() + Duration::minutes(5), now()),
            "in 5 minutes"
        );
    }

    #[test]
    fn test_unparseable_input() {
        assert_eq!(time_ago("", now()), "Unknown");
        assert_eq!(time_ago("yesterday", now()), "Unknown");
        assert_eq!(format_date("not a date"), "");
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date("2026-01-11T08:30:00Z"), "Jan 11, 2026");
        assert_eq!(format_date("2025-12-03T00:00:00.123456+00:00"), "Dec 3, 2025");
    }
}
