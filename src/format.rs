use chrono::{ DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc };
use std::fmt::Display;

const TIME_FORMAT: &str = "%I:%M %p";
const DATE_FORMAT: &str = "%b %-d, %Y";

/// Recording counter as `MM:SS`.
pub fn elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Bubble time for a message, in the local zone.
pub fn message_time(timestamp: &DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format(TIME_FORMAT).to_string()
}

/// Date label for a conversation row.
pub fn conversation_date(raw: Option<&str>) -> String {
    conversation_date_at(raw, Local::now())
}

pub fn conversation_date_at<Tz>(raw: Option<&str>, now: DateTime<Tz>) -> String
    where Tz: TimeZone, Tz::Offset: Display
{
    let date = match raw.and_then(|s| parse_timestamp(s, &now.timezone())) {
        Some(date) => date,
        None => {
            return String::new();
        }
    };

    let today = now.date_naive();
    let day = date.date_naive();
    if day == today {
        date.format(TIME_FORMAT).to_string()
    } else if Some(day) == today.checked_sub_signed(Duration::days(1)) {
        format!("Yesterday, {}", date.format(TIME_FORMAT))
    } else {
        date.format(DATE_FORMAT).to_string()
    }
}

/// Accepts RFC 3339 and the zone-less ISO forms the backend emits; the
/// latter are read as local wall-clock time.
fn parse_timestamp<Tz: TimeZone>(raw: &str, tz: &Tz) -> Option<DateTime<Tz>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(tz));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
}
