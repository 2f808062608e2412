//! Timestamp parsing for broadcast guides and subtitle tracks
//!
//! Broadcast times use the XMLTV layout `YYYYMMDDHHmmss [+HHMM]` and are
//! decoded by fixed character offsets. Media times use `HH:MM:SS.mmm`
//! (or a comma before the milliseconds) and are returned as seconds.

use chrono::{DateTime, Local, LocalResult, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Number of leading digits in a broadcast timestamp
const BROADCAST_DIGITS: usize = 14;

/// How the trailing UTC-offset token of a broadcast timestamp is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimezonePolicy {
    /// Ignore the offset and read the digits as local wall-clock time
    #[default]
    LocalWallClock,
    /// Apply the offset token; a missing token means UTC
    HonorOffset,
}

/// Parse XMLTV time format: "20240115120000 +0000" -> UTC instant
///
/// Any 14 leading digits are accepted. Components outside their calendar range
/// carry into the next field (month 13 is January of the following year).
pub fn parse_broadcast_time(time_str: &str, policy: TimezonePolicy) -> Result<DateTime<Utc>> {
    let time_str = time_str.trim();
    let digits = time_str.bytes().take_while(u8::is_ascii_digit).count();
    if digits < BROADCAST_DIGITS {
        return Err(EngineError::MalformedTimestamp(format!(
            "expected {} digits in {:?}",
            BROADCAST_DIGITS, time_str
        )));
    }

    let (datetime, tz) = time_str.split_at(BROADCAST_DIGITS);
    let field = |from: usize, to: usize| -> i64 {
        datetime.as_bytes()[from..to]
            .iter()
            .fold(0, |acc, b| acc * 10 + i64::from(b - b'0'))
    };

    let naive = carry_datetime(
        field(0, 4),
        field(4, 6),
        field(6, 8),
        field(8, 10),
        field(10, 12),
        field(12, 14),
    )
    .ok_or_else(|| EngineError::MalformedTimestamp(format!("out of range: {:?}", time_str)))?;

    let instant = match policy {
        TimezonePolicy::LocalWallClock => local_to_utc(&naive),
        TimezonePolicy::HonorOffset => naive
            .checked_sub_signed(TimeDelta::seconds(i64::from(parse_tz_offset(tz))))
            .unwrap_or(naive)
            .and_utc(),
    };

    Ok(instant)
}

/// Build a datetime the way a lenient date constructor does: every field past
/// the year is added as an offset, so overflowing values roll forward.
fn carry_datetime(year: i64, month: i64, day: i64, hour: i64, minute: i64, second: i64) -> Option<NaiveDateTime> {
    let months = year * 12 + (month - 1);
    let first = NaiveDate::from_ymd_opt(
        i32::try_from(months.div_euclid(12)).ok()?,
        u32::try_from(months.rem_euclid(12) + 1).ok()?,
        1,
    )?;

    let offset = TimeDelta::try_days(day - 1)?
        .checked_add(&TimeDelta::try_hours(hour)?)?
        .checked_add(&TimeDelta::try_minutes(minute)?)?
        .checked_add(&TimeDelta::try_seconds(second)?)?;

    first.and_hms_opt(0, 0, 0)?.checked_add_signed(offset)
}

fn local_to_utc(naive: &NaiveDateTime) -> DateTime<Utc> {
    match Local.from_local_datetime(naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        // Inside a DST gap: the wall-clock time does not exist, move past it
        LocalResult::None => Local
            .from_local_datetime(&(*naive + TimeDelta::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| naive.and_utc()),
    }
}

/// Parse timezone offset like "+0100" or "-0530" to seconds
fn parse_tz_offset(tz: &str) -> i32 {
    let tz = tz.trim();
    if tz.is_empty() {
        return 0;
    }

    let sign = if tz.starts_with('-') { -1 } else { 1 };
    let tz = tz.trim_start_matches(['+', '-']);

    let hours: i32 = tz.get(0..2).and_then(|h| h.parse().ok()).unwrap_or(0);
    let minutes: i32 = tz.get(2..4).and_then(|m| m.parse().ok()).unwrap_or(0);
    sign * (hours * 3600 + minutes * 60)
}

/// Parse a media time "HH:MM:SS.mmm" (or "HH:MM:SS,mmm") to seconds
pub fn parse_media_time(timestamp: &str) -> Result<f64> {
    let timestamp = timestamp.trim();
    let parts: Vec<&str> = timestamp.split(':').collect();
    if parts.len() != 3 {
        return Err(EngineError::MalformedTimestamp(format!(
            "expected HH:MM:SS in {:?}",
            timestamp
        )));
    }

    let hours = parse_component(parts[0], timestamp)?;
    let minutes = parse_component(parts[1], timestamp)?;

    let (seconds, fraction) = match parts[2].find(['.', ',']) {
        Some(pos) => (&parts[2][..pos], Some(&parts[2][pos + 1..])),
        None => (parts[2], None),
    };
    let seconds = parse_component(seconds, timestamp)?;

    let fraction = match fraction {
        None => 0.0,
        Some(f) if !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()) => format!("0.{}", f)
            .parse::<f64>()
            .map_err(|_| EngineError::MalformedTimestamp(format!("bad fraction in {:?}", timestamp)))?,
        Some(_) => {
            return Err(EngineError::MalformedTimestamp(format!(
                "bad fraction in {:?}",
                timestamp
            )))
        }
    };

    Ok(hours * 3600.0 + minutes * 60.0 + seconds + fraction)
}

fn parse_component(part: &str, timestamp: &str) -> Result<f64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EngineError::MalformedTimestamp(format!(
            "non-numeric field {:?} in {:?}",
            part, timestamp
        )));
    }
    part.parse::<u64>()
        .map(|v| v as f64)
        .map_err(|_| EngineError::MalformedTimestamp(format!("field {:?} too large", part)))
}
