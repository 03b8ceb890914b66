use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::domain::session_state::TimestampMs;

const ID_LENGTH: usize = 9;
const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub const LOCAL_MINUTE_FORMAT: &str = "%Y-%m-%dT%H:%M";
const LOCAL_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// Local wall time at minute precision, without a zone suffix
/// (`2026-02-20T22:45`).
pub fn local_iso_string(datetime: &DateTime<Local>) -> String {
    datetime.naive_local().format(LOCAL_MINUTE_FORMAT).to_string()
}

pub fn local_iso_from_timestamp(timestamp: TimestampMs) -> String {
    local_naive_from_timestamp(timestamp)
        .format(LOCAL_MINUTE_FORMAT)
        .to_string()
}

pub fn local_naive_from_timestamp(timestamp: TimestampMs) -> NaiveDateTime {
    DateTime::<Utc>::from_timestamp_millis(timestamp.0)
        .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
        .with_timezone(&Local)
        .naive_local()
}

pub fn timestamp_to_iso8601(timestamp: TimestampMs) -> String {
    let datetime = DateTime::<Utc>::from_timestamp_millis(timestamp.0)
        .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
    datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses the timestamps found in stored records. Zone-less strings are taken
/// as local wall time; zoned strings are converted to local wall time.
pub fn parse_local_datetime(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    for format in LOCAL_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }

    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|datetime| datetime.with_timezone(&Local).naive_local())
}

/// `YYYY/MM/DD HH:MM`, or an empty string when the input does not parse.
pub fn format_date(iso: &str) -> String {
    parse_local_datetime(iso)
        .map(|datetime| datetime.format("%Y/%m/%d %H:%M").to_string())
        .unwrap_or_default()
}

pub fn format_duration(minutes: f64) -> String {
    let minutes = if minutes.is_finite() {
        minutes.max(0.0)
    } else {
        0.0
    };
    let hours = (minutes / 60.0).floor() as u64;
    let rest = (minutes % 60.0).floor() as u64;

    if hours > 0 {
        format!("{hours}h{rest:02}m")
    } else {
        format!("{rest}m")
    }
}

pub fn format_timer(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

/// Renders a number the way the sync endpoint and CSV export expect: no
/// trailing `.0` for whole values, and an empty string for zero or
/// non-finite values (those are treated as "not entered").
pub fn number_or_empty(value: f64) -> String {
    if !value.is_finite() || value == 0.0 {
        return String::new();
    }
    format!("{value}")
}

/// Short base-36 id. Uniqueness is probabilistic (about 46 random bits).
pub fn generate_id() -> String {
    let mut bits = Uuid::new_v4().as_u128();
    let mut id = String::with_capacity(ID_LENGTH);

    for _ in 0..ID_LENGTH {
        let digit = (bits % 36) as usize;
        id.push(char::from(BASE36_ALPHABET[digit]));
        bits /= 36;
    }

    id
}
