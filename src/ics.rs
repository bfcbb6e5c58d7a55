use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::error::{ClientError, ClientResult};
use crate::models::Meeting;

const ICS_STAMP: &str = "%Y%m%dT%H%M%SZ";

/// Parses a meeting timestamp. RFC 3339 values keep their offset; naive
/// values are read as UTC.
pub fn parse_meeting_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .into_iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Single-event calendar file for a meeting, CRLF line endings.
pub fn render_ics(meeting: &Meeting) -> ClientResult<String> {
    let start = parse_meeting_time(&meeting.date).ok_or_else(|| {
        ClientError::validation(format!("meeting date is not a timestamp: {}", meeting.date))
    })?;
    let end = start + Duration::minutes(i64::from(meeting.duration_minutes));
    let stamp = start.format(ICS_STAMP).to_string();

    let lines = [
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//opsdesk//EN".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{}", meeting.id),
        format!("DTSTAMP:{stamp}"),
        format!("DTSTART:{stamp}"),
        format!("DTEND:{}", end.format(ICS_STAMP)),
        format!("SUMMARY:{}", meeting.title),
        format!("DESCRIPTION:{}", meeting.description.as_deref().unwrap_or_default()),
        format!("ATTENDEE:{}", meeting.attendees.join(",")),
        format!("URL:{}", meeting.meet_url.as_deref().unwrap_or_default()),
        "END:VEVENT".to_string(),
        "END:VCALENDAR".to_string(),
    ];

    Ok(lines.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meeting(date: &str) -> Meeting {
        Meeting {
            id: "meet-1".to_string(),
            title: "Standup".to_string(),
            description: None,
            attendees: vec!["u-ada".to_string(), "u-grace".to_string()],
            date: date.to_string(),
            duration_minutes: 45,
            task_id: None,
            created_by: "demo-user".to_string(),
            meet_url: None,
        }
    }

    #[test]
    fn accepts_offset_and_naive_timestamps() {
        let offset = parse_meeting_time("2026-10-20T11:30:00+02:00").expect("rfc3339 should parse");
        assert_eq!(offset.to_rfc3339(), "2026-10-20T09:30:00+00:00");

        let naive = parse_meeting_time("2026-10-20T09:30").expect("naive should parse");
        assert_eq!(naive, offset);

        assert!(parse_meeting_time("next tuesday").is_none());
    }

    #[test]
    fn renders_start_and_end_in_utc() {
        let ics = render_ics(&meeting("2026-10-20T09:30:00Z")).expect("ics should render");
        assert!(ics.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(ics.contains("DTSTART:20261020T093000Z\r\n"));
        assert!(ics.contains("DTEND:20261020T101500Z\r\n"));
        assert!(ics.contains("ATTENDEE:u-ada,u-grace\r\n"));
        assert!(ics.ends_with("END:VCALENDAR"));
    }

    #[test]
    fn invalid_date_is_a_validation_error() {
        let error = render_ics(&meeting("soon")).expect_err("date is invalid");
        assert!(matches!(error, ClientError::Validation(_)));
    }
}
