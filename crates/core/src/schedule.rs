//! Date, Time and Timezone Resolution
//!
//! Turns the loosely formatted values an agent records ("2025-03-01T10:00",
//! "UTC plus one", "Europe/Berlin") into an absolute start instant. A local
//! time is never given an implicit zone: without an offset or a recorded
//! timezone it is rejected as ambiguous.

use chrono::{DateTime, FixedOffset, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;

/// Validation failures for date, time and timezone values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("'{0}' is not a valid ISO-8601 date-time")]
    InvalidDateTime(String),
    #[error("'{0}' is not a valid IANA timezone or UTC offset like UTC+1")]
    InvalidTimezone(String),
    #[error("date-time '{0}' has no timezone; record a timezone first")]
    MissingTimezone(String),
    #[error("local time '{0}' does not exist in timezone {1}")]
    NonexistentLocalTime(String, String),
    #[error("start time {0} is in the past")]
    InPast(String),
}

/// The largest offset from UTC any real timezone uses.
const MAX_OFFSET_HOURS: i32 = 14;

/// Starts this far behind the clock still count as "now".
const PAST_TOLERANCE_MINUTES: i64 = 2;

/// A start date-time as recorded, before it is pinned to a timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTime {
    /// The value carried its own offset (e.g. `2025-03-01T10:00:00+01:00`).
    Absolute(DateTime<FixedOffset>),
    /// A wall-clock time that needs a timezone to become an instant.
    Local(NaiveDateTime),
}

impl StartTime {
    /// Parses an ISO-8601 date-time, with or without seconds and offset.
    pub fn parse(raw: &str) -> Result<Self, ScheduleError> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(ScheduleError::InvalidDateTime(raw.to_string()));
        }

        if let Ok(absolute) = value.parse::<DateTime<FixedOffset>>() {
            return Ok(Self::Absolute(absolute));
        }
        // `parse` requires seconds; agents often omit them.
        let zulu = value
            .strip_suffix('Z')
            .or_else(|| value.strip_suffix('z'))
            .map(|head| format!("{head}+00:00"));
        let with_offset = zulu.as_deref().unwrap_or(value);
        if let Ok(absolute) = DateTime::parse_from_str(with_offset, "%Y-%m-%dT%H:%M%:z") {
            return Ok(Self::Absolute(absolute));
        }

        if let Ok(local) = value.parse::<NaiveDateTime>() {
            return Ok(Self::Local(local));
        }
        if let Ok(local) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
            return Ok(Self::Local(local));
        }
        Err(ScheduleError::InvalidDateTime(raw.to_string()))
    }

    pub fn has_offset(&self) -> bool {
        matches!(self, Self::Absolute(_))
    }
}

/// A timezone the caller named, either as a zone database entry or a bare offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Utc,
    Named(Tz),
    Offset(FixedOffset),
}

impl Zone {
    /// Parses `UTC`, IANA names and spoken or written UTC/GMT offsets.
    pub fn parse(raw: &str) -> Result<Self, ScheduleError> {
        let value = raw.trim();
        let invalid = || ScheduleError::InvalidTimezone(raw.to_string());
        if value.is_empty() {
            return Err(invalid());
        }
        if value.eq_ignore_ascii_case("utc") || value.eq_ignore_ascii_case("gmt") {
            return Ok(Self::Utc);
        }
        if let Ok(tz) = value.parse::<Tz>() {
            return Ok(Self::Named(tz));
        }
        parse_offset(value).map(Self::Offset).ok_or_else(invalid)
    }

    /// The name calendar providers accept as a `timeZone`, if this zone has one.
    pub fn iana_name(&self) -> Option<&'static str> {
        match self {
            Self::Utc => Some("UTC"),
            Self::Named(tz) => Some(tz.name()),
            Self::Offset(_) => None,
        }
    }

    /// Pins a wall-clock time to this zone.
    pub fn localize(&self, local: NaiveDateTime) -> Result<DateTime<FixedOffset>, ScheduleError> {
        match self {
            Self::Utc => Ok(Utc.from_utc_datetime(&local).fixed_offset()),
            Self::Offset(offset) => single_or_earliest(offset.from_local_datetime(&local))
                .ok_or_else(|| self.nonexistent(local)),
            Self::Named(tz) => single_or_earliest(tz.from_local_datetime(&local))
                .map(|dt| dt.fixed_offset())
                .ok_or_else(|| self.nonexistent(local)),
        }
    }

    fn nonexistent(&self, local: NaiveDateTime) -> ScheduleError {
        ScheduleError::NonexistentLocalTime(local.to_string(), self.to_string())
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utc => write!(f, "UTC"),
            Self::Named(tz) => write!(f, "{}", tz.name()),
            Self::Offset(offset) => write!(f, "UTC{offset}"),
        }
    }
}

fn single_or_earliest<T: TimeZone>(result: LocalResult<DateTime<T>>) -> Option<DateTime<T>> {
    match result {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => None,
    }
}

/// Parses `UTC+1`, `gmt-05:30`, `+0200`, `UTC plus one` and similar forms.
fn parse_offset(value: &str) -> Option<FixedOffset> {
    let normalized: String = value
        .to_lowercase()
        .replace("plus", "+")
        .replace("minus", "-")
        .split_whitespace()
        .collect();

    let rest = normalized
        .strip_prefix("utc")
        .or_else(|| normalized.strip_prefix("gmt"))
        .unwrap_or(&normalized);

    let (sign, magnitude) = match rest.chars().next()? {
        '+' => (1, &rest[1..]),
        '-' => (-1, &rest[1..]),
        _ => return None,
    };

    let (hours, minutes) = if let Some(hours) = word_hours(magnitude) {
        (hours, 0)
    } else {
        numeric_hours_minutes(magnitude)?
    };
    if hours > MAX_OFFSET_HOURS || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn numeric_hours_minutes(magnitude: &str) -> Option<(i32, i32)> {
    if magnitude.is_empty() || !magnitude.chars().all(|c| c.is_ascii_digit() || c == ':') {
        return None;
    }
    let (hours, minutes) = match magnitude.split_once(':') {
        Some((h, m)) => (h, m),
        None if magnitude.len() > 2 => magnitude.split_at(magnitude.len() - 2),
        None => (magnitude, "0"),
    };
    if hours.is_empty() || hours.len() > 2 || minutes.is_empty() || minutes.len() > 2 {
        return None;
    }
    Some((hours.parse().ok()?, minutes.parse().ok()?))
}

fn word_hours(word: &str) -> Option<i32> {
    const WORDS: [&str; 15] = [
        "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
        "eleven", "twelve", "thirteen", "fourteen",
    ];
    WORDS.iter().position(|w| *w == word).map(|i| i as i32)
}

/// Resolves a recorded start and optional timezone into an absolute instant.
///
/// A start that carries its own offset keeps it; a local start needs `zone`.
pub fn resolve_start(
    start: &StartTime,
    zone: Option<&Zone>,
) -> Result<DateTime<FixedOffset>, ScheduleError> {
    match (start, zone) {
        (StartTime::Absolute(dt), _) => Ok(*dt),
        (StartTime::Local(local), Some(zone)) => zone.localize(*local),
        (StartTime::Local(local), None) => {
            Err(ScheduleError::MissingTimezone(local.format("%Y-%m-%dT%H:%M").to_string()))
        }
    }
}

/// Rejects a start that lies more than a couple of minutes before `now`.
pub fn ensure_not_past(start: DateTime<FixedOffset>, now: DateTime<Utc>) -> Result<(), ScheduleError> {
    if start.with_timezone(&Utc) < now - chrono::Duration::minutes(PAST_TOLERANCE_MINUTES) {
        return Err(ScheduleError::InPast(start.to_rfc3339()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_parse_local_without_seconds() {
        let start = StartTime::parse("2025-03-01T10:00").unwrap();
        assert_eq!(start, StartTime::Local(local(2025, 3, 1, 10, 0)));
        assert!(!start.has_offset());
    }

    #[test]
    fn test_parse_local_with_seconds() {
        let start = StartTime::parse(" 2025-03-01T10:00:30 ").unwrap();
        match start {
            StartTime::Local(dt) => assert_eq!(dt.second(), 30),
            other => panic!("expected local time, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_absolute_forms() {
        for raw in [
            "2025-03-01T10:00:00+01:00",
            "2025-03-01T09:00:00Z",
            "2025-03-01T10:00+01:00",
            "2025-03-01T09:00Z",
        ] {
            let start = StartTime::parse(raw).unwrap();
            match start {
                StartTime::Absolute(dt) => {
                    assert_eq!(dt.with_timezone(&Utc), Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(), "{raw}");
                }
                other => panic!("expected absolute for {raw}, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(StartTime::parse("next tuesday"), Err(ScheduleError::InvalidDateTime(_))));
        assert!(matches!(StartTime::parse(""), Err(ScheduleError::InvalidDateTime(_))));
        assert!(StartTime::parse("2025-13-01T10:00").is_err());
    }

    #[test]
    fn test_zone_utc_and_iana() {
        assert_eq!(Zone::parse("utc").unwrap(), Zone::Utc);
        assert_eq!(Zone::parse("UTC").unwrap().iana_name(), Some("UTC"));
        let berlin = Zone::parse("Europe/Berlin").unwrap();
        assert_eq!(berlin, Zone::Named(chrono_tz::Europe::Berlin));
        assert_eq!(berlin.iana_name(), Some("Europe/Berlin"));
    }

    #[test]
    fn test_zone_offsets() {
        let cases = [
            ("UTC+1", 3600),
            ("utc-5", -5 * 3600),
            ("UTC+05:30", 5 * 3600 + 30 * 60),
            ("+0200", 2 * 3600),
            ("GMT plus one", 3600),
            ("utc minus three", -3 * 3600),
            ("UTC + 14", 14 * 3600),
        ];
        for (raw, seconds) in cases {
            match Zone::parse(raw) {
                Ok(Zone::Offset(offset)) => assert_eq!(offset.local_minus_utc(), seconds, "{raw}"),
                other => panic!("unexpected result for {raw}: {:?}", other),
            }
        }
    }

    #[test]
    fn test_zone_offset_has_no_iana_name() {
        assert_eq!(Zone::parse("UTC+1").unwrap().iana_name(), None);
    }

    #[test]
    fn test_zone_rejects_invalid() {
        for raw in ["", "Mars/Olympus", "UTC+15", "UTC+01:75", "utc plus twenty", "banana"] {
            assert!(
                matches!(Zone::parse(raw), Err(ScheduleError::InvalidTimezone(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_local_without_zone_is_rejected() {
        let start = StartTime::parse("2025-03-01T10:00").unwrap();
        let err = resolve_start(&start, None).unwrap_err();
        assert!(matches!(err, ScheduleError::MissingTimezone(_)));
    }

    #[test]
    fn test_resolve_local_with_zone() {
        let start = StartTime::parse("2025-03-01T10:00").unwrap();
        let instant = resolve_start(&start, Some(&Zone::Utc)).unwrap();
        assert_eq!(instant.with_timezone(&Utc), Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap());

        let berlin = Zone::parse("Europe/Berlin").unwrap();
        let instant = resolve_start(&start, Some(&berlin)).unwrap();
        assert_eq!(instant.with_timezone(&Utc), Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_resolve_absolute_keeps_own_offset() {
        let start = StartTime::parse("2025-03-01T10:00:00+02:00").unwrap();
        let instant = resolve_start(&start, Some(&Zone::Utc)).unwrap();
        assert_eq!(instant.offset().local_minus_utc(), 7200);
    }

    #[test]
    fn test_resolve_rejects_dst_gap() {
        // Clocks in Berlin jump from 02:00 to 03:00 on 2025-03-30.
        let start = StartTime::Local(local(2025, 3, 30, 2, 30));
        let berlin = Zone::parse("Europe/Berlin").unwrap();
        assert!(matches!(
            resolve_start(&start, Some(&berlin)),
            Err(ScheduleError::NonexistentLocalTime(_, _))
        ));
    }

    #[test]
    fn test_past_start_tolerates_small_drift() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let at = |min: i64| (now + chrono::Duration::minutes(min)).fixed_offset();

        assert!(ensure_not_past(at(30), now).is_ok());
        assert!(ensure_not_past(at(-1), now).is_ok());
        assert!(matches!(ensure_not_past(at(-3), now), Err(ScheduleError::InPast(_))));
        assert!(ensure_not_past(at(-60 * 24), now).is_err());
    }

    #[test]
    fn test_resolve_dst_overlap_takes_earlier() {
        // 02:30 happens twice in Berlin on 2025-10-26; the first one is CEST (+02:00).
        let start = StartTime::Local(local(2025, 10, 26, 2, 30));
        let berlin = Zone::parse("Europe/Berlin").unwrap();
        let instant = resolve_start(&start, Some(&berlin)).unwrap();
        assert_eq!(instant.offset().local_minus_utc(), 7200);
    }
}
