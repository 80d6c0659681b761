use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use regex::Regex;
use std::sync::LazyLock;

use lokiscope_types::TimeRange;

/// Relative offsets like `-2d` or `-36h`
static RELATIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-(\d+)([dh])$").expect("valid relative time regex"));

/// Resolve a time token against `now`
///
/// `-<N>d` and `-<N>h` become an absolute RFC 3339 timestamp with
/// nanosecond precision in UTC. Anything else is returned unchanged and left
/// for the store to interpret.
pub fn resolve(token: &str, now: DateTime<Utc>) -> String {
    relative_offset(token)
        .and_then(|delta| now.checked_sub_signed(delta))
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .unwrap_or_else(|| token.to_string())
}

/// Resolve both ends of a range
pub fn resolve_range(range: &TimeRange, now: DateTime<Utc>) -> TimeRange {
    TimeRange {
        from: range.from.as_deref().map(|t| resolve(t, now)),
        to: range.to.as_deref().map(|t| resolve(t, now)),
    }
}

fn relative_offset(token: &str) -> Option<TimeDelta> {
    let caps = RELATIVE.captures(token)?;
    let n: i64 = caps[1].parse().ok()?;
    if n == 0 {
        return None;
    }
    match &caps[2] {
        "d" => TimeDelta::try_days(n),
        "h" => TimeDelta::try_hours(n),
        _ => None,
    }
}
