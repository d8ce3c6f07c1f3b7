use crate::error::{validation_error, SyncResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;

/// Naive datetime layouts accepted for date bounds, read as UTC
const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Parse a date string in any of the accepted ISO 8601 shapes
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(start_of_day)
}

/// Parse an optional query bound; a missing or blank value means no bound
pub fn parse_date_bound(raw: Option<&str>, name: &str) -> SyncResult<Option<DateTime<Utc>>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_datetime(value).map(Some).ok_or_else(|| {
            validation_error(&format!(
                "Invalid {}: {:?}. Must be an ISO 8601 date or datetime",
                name, value
            ))
        }),
    }
}

/// Parse both bounds of a range and check they are ordered
pub fn parse_date_range(
    start: Option<&str>,
    end: Option<&str>,
) -> SyncResult<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
    let start_date = parse_date_bound(start, "startDate")?;
    let end_date = parse_date_bound(end, "endDate")?;

    if let (Some(s), Some(e)) = (start_date, end_date) {
        if s > e {
            return Err(validation_error("startDate must not be after endDate"));
        }
    }

    Ok((start_date, end_date))
}

/// Read a Google event time object (`{"dateTime": ..}` or `{"date": ..}`)
pub fn parse_event_time(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let value = value?.as_object()?;

    if let Some(date_time) = value.get("dateTime").and_then(|v| v.as_str()) {
        return DateTime::parse_from_rfc3339(date_time)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }

    value
        .get("date")
        .and_then(|v| v.as_str())
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .map(start_of_day)
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
