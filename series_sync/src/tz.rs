//! Time zone parsing and conversion helpers.
//!
//! What this module provides:
//! - [`parse_ts_to_utc`]: Parse RFC-3339 timestamps with an explicit offset and convert to UTC.
//! - [`to_rfc3339_millis`]: the one string form timestamps are stored in.
//! - [`day_floor_in`]: start of the current market day as a UTC instant, the default
//!   exclusive end of every fetch window.
//!
//! All database writes are RFC-3339 UTC strings; all slot math uses UTC. Local
//! times only appear when deriving the market-day boundary.
//!
//! Examples
//! - RFC-3339 with offset to UTC:
//!   "2024-03-10T09:30:00-05:00" -> "2024-03-10T14:30:00Z"
//! - Amsterdam midnight in winter (UTC+1):
//!   2024-01-15 10:00Z -> 2024-01-14T23:00:00Z

use chrono::{DateTime, Months, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// Zone whose local midnight ends the default fetch window.
pub const DEFAULT_MARKET_TZ: &str = "Europe/Amsterdam";

#[derive(Debug, Error)]
pub enum TzError {
    #[error("bad rfc3339 timestamp {input:?}: {source}")]
    Parse {
        input: String,
        source: chrono::ParseError,
    },
    #[error("unknown time zone {0:?}")]
    UnknownZone(String),
    #[error("nonexistent local time {0}")]
    Nonexistent(NaiveDateTime),
}

/// RFC-3339 with offset -> UTC.
///
/// Example:
/// - "2024-03-10T09:30:00-05:00" -> "2024-03-10T14:30:00Z"
pub fn parse_ts_to_utc(s: &str) -> Result<DateTime<Utc>, TzError> {
    let dt = DateTime::parse_from_rfc3339(s).map_err(|source| TzError::Parse {
        input: s.to_string(),
        source,
    })?;
    Ok(dt.with_timezone(&Utc))
}

/// Parses an IANA zone name such as "Europe/Amsterdam".
pub fn parse_tz(name: &str) -> Result<Tz, TzError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| TzError::UnknownZone(name.to_string()))
}

/// Start of the local calendar day containing `now`, in `tz`, as UTC.
///
/// A midnight skipped by a DST jump resolves to the first valid local minute
/// after it; a repeated midnight takes the earlier instant.
pub fn day_floor_in(tz: Tz, now: DateTime<Utc>) -> Result<DateTime<Utc>, TzError> {
    let local_midnight = now
        .with_timezone(&tz)
        .date_naive()
        .and_time(chrono::NaiveTime::MIN);
    resolve_local(local_midnight, tz)
}

fn resolve_local(naive: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>, TzError> {
    use chrono::offset::LocalResult::*;
    match tz.from_local_datetime(&naive) {
        Single(dt) | Ambiguous(dt, _) => Ok(dt.with_timezone(&Utc)),
        None => {
            // DST gaps are at most two hours.
            let mut t = naive;
            for _ in 0..120 {
                t += chrono::Duration::minutes(1);
                if let Single(dt) = tz.from_local_datetime(&t) {
                    return Ok(dt.with_timezone(&Utc));
                }
            }
            Err(TzError::Nonexistent(naive))
        }
    }
}

/// `to` minus whole calendar years, clamped to the earliest representable instant.
pub fn years_before(to: DateTime<Utc>, years: u32) -> DateTime<Utc> {
    to.checked_sub_months(Months::new(years.saturating_mul(12)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Format a UTC datetime as an RFC-3339 string with millisecond precision.
pub fn to_rfc3339_millis(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
