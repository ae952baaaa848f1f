//! Inbound calendar file parsing using the icalendar crate's parser.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use icalendar::{
    CalendarDateTime, DatePerhapsTime,
    parser::{Component, Property, read_calendar, unfold},
};

use crate::error::{CalendarError, CalendarResult};
use crate::event::{
    AlarmInterval, Attendee, AttendeeStatus, CalendarEvent, EndType, MailAddress, RepeatPeriod,
    RepeatRule,
};
use crate::ics::CalendarMethod;
use crate::time_zone::{local_to_utc, start_of_next_day_with_zone, valid_time_zone};

/// One VEVENT with the alarm offsets it carried.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub event: CalendarEvent,
    pub alarms: Vec<AlarmInterval>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCalendarData {
    pub method: CalendarMethod,
    pub contents: Vec<ParsedEvent>,
}

/// Parse a calendar file. Floating times are read in `zone`.
///
/// VEVENTs without UID or DTSTART are skipped; a file that is not iCalendar at
/// all is an error.
pub fn parse_calendar_file(content: &str, zone: Tz) -> CalendarResult<ParsedCalendarData> {
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).map_err(|e| CalendarError::IcsParse(e.to_string()))?;

    let method = calendar
        .properties
        .iter()
        .find(|p| p.name == "METHOD")
        .and_then(|p| CalendarMethod::from_ics_str(p.val.as_ref()))
        .unwrap_or(CalendarMethod::Publish);

    let contents = calendar
        .components
        .iter()
        .filter(|c| c.name == "VEVENT")
        .filter_map(|vevent| parse_vevent(vevent, zone))
        .collect();

    Ok(ParsedCalendarData { method, contents })
}

fn parse_vevent(vevent: &Component, zone: Tz) -> Option<ParsedEvent> {
    let uid = vevent.find_prop("UID")?.val.to_string();
    let start_prop = DatePerhapsTime::try_from(vevent.find_prop("DTSTART")?).ok()?;
    let start = to_utc(&start_prop, zone);

    let end = match vevent.find_prop("DTEND") {
        Some(prop) => to_utc(&DatePerhapsTime::try_from(prop).ok()?, zone),
        None => match vevent.find_prop("DURATION").and_then(|p| parse_duration(p.val.as_ref())) {
            Some(duration) => start + duration,
            None if matches!(start_prop, DatePerhapsTime::Date(_)) => start + Duration::days(1),
            None => start,
        },
    };

    let rule_zone = match &start_prop {
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { tzid, .. }) => {
            valid_time_zone(tzid, Some(zone.name()))
        }
        _ => zone,
    };

    let mut event = CalendarEvent::new(start, end);
    event.uid = Some(uid);
    event.summary = text_prop(vevent, "SUMMARY");
    event.description = text_prop(vevent, "DESCRIPTION");
    event.location = text_prop(vevent, "LOCATION");
    event.sequence = vevent
        .find_prop("SEQUENCE")
        .and_then(|p| p.val.as_ref().trim().parse().ok())
        .unwrap_or(0);
    event.organizer = vevent
        .find_prop("ORGANIZER")
        .map(|p| strip_mailto(p.val.as_ref()).to_string());
    event.attendees = vevent
        .properties
        .iter()
        .filter(|p| p.name == "ATTENDEE")
        .map(parse_attendee)
        .collect();
    event.repeat_rule = vevent
        .find_prop("RRULE")
        .and_then(|p| parse_rrule(p.val.as_ref(), rule_zone));

    let alarms = vevent
        .components
        .iter()
        .filter(|c| c.name == "VALARM")
        .filter_map(|alarm| {
            let trigger = alarm.find_prop("TRIGGER")?.val.as_ref();
            parse_trigger_minutes(trigger).and_then(AlarmInterval::from_minutes)
        })
        .collect();

    Some(ParsedEvent { event, alarms })
}

fn text_prop(component: &Component, name: &str) -> String {
    component
        .find_prop(name)
        .map(|p| p.val.to_string())
        .unwrap_or_default()
}

/// Convert DTSTART/DTEND values to instants. Dates become UTC midnights,
/// which is how all-day events are stored.
fn to_utc(value: &DatePerhapsTime, zone: Tz) -> DateTime<Utc> {
    match value {
        DatePerhapsTime::Date(d) => d.and_time(chrono::NaiveTime::MIN).and_utc(),
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(dt)) => *dt,
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => local_to_utc(zone, *naive),
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
            local_to_utc(valid_time_zone(tzid, Some(zone.name())), *date_time)
        }
    }
}

fn strip_mailto(value: &str) -> &str {
    let trimmed = value.trim();
    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("mailto:") => &trimmed[7..],
        _ => trimmed,
    }
}

fn param<'a>(prop: &'a Property, key: &str) -> Option<&'a str> {
    prop.params
        .iter()
        .find(|p| p.key == key)
        .and_then(|p| p.val.as_ref())
        .map(|v| v.as_ref())
}

fn parse_attendee(prop: &Property) -> Attendee {
    let address = strip_mailto(prop.val.as_ref()).to_string();
    let name = param(prop, "CN").unwrap_or_default().to_string();
    let status = param(prop, "PARTSTAT")
        .and_then(AttendeeStatus::from_ics_str)
        .unwrap_or_default();

    Attendee {
        address: MailAddress { address, name },
        status,
    }
}

/// Parse the RRULE subset the client can represent: FREQ, INTERVAL and
/// COUNT or UNTIL. UNTIL is inclusive in iCalendar and exclusive here, so it
/// is moved to the start of the following day.
fn parse_rrule(value: &str, zone: Tz) -> Option<RepeatRule> {
    let mut frequency = None;
    let mut rule_interval = 1;
    let mut count = None;
    let mut until = None;

    for part in value.split(';') {
        let Some((key, val)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_uppercase().as_str() {
            "FREQ" => frequency = RepeatPeriod::from_ics_str(val.trim()),
            "INTERVAL" => rule_interval = val.trim().parse().unwrap_or(1),
            "COUNT" => count = val.trim().parse::<i64>().ok(),
            "UNTIL" => until = parse_until(val.trim(), zone),
            _ => {}
        }
    }

    let mut rule = RepeatRule::new(frequency?, rule_interval, zone.name());
    if let Some(n) = count {
        rule.end_type = EndType::Count;
        rule.end_value = Some(n);
    } else if let Some(until) = until {
        rule.end_type = EndType::UntilDate;
        rule.end_value = Some(until.timestamp_millis());
    }
    Some(rule)
}

fn parse_until(value: &str, zone: Tz) -> Option<DateTime<Utc>> {
    if let Ok(date) = chrono::NaiveDate::parse_from_str(value, "%Y%m%d") {
        return Some((date + Duration::days(1)).and_time(chrono::NaiveTime::MIN).and_utc());
    }
    let instant = match value.strip_suffix('Z') {
        Some(utc) => NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?.and_utc(),
        None => local_to_utc(zone, NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?),
    };
    Some(start_of_next_day_with_zone(instant, zone))
}

fn parse_duration(value: &str) -> Option<Duration> {
    let duration = iso8601::duration(value.trim().trim_start_matches('+')).ok()?;
    let std_duration: std::time::Duration = duration.into();
    Duration::from_std(std_duration).ok()
}

/// Parse a TRIGGER value to minutes before the event (-PT30M, -P1D, ...).
fn parse_trigger_minutes(value: &str) -> Option<i64> {
    let is_before = value.starts_with('-');
    let minutes = parse_duration(value.trim_start_matches('-'))?.num_minutes();
    Some(if is_before { minutes } else { -minutes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::Berlin;

    const REPLY: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//Other Client//EN\r\n\
METHOD:REPLY\r\n\
BEGIN:VEVENT\r\n\
UID:abc-123@sealcal\r\n\
DTSTAMP:20200520T100000Z\r\n\
DTSTART;TZID=Europe/Berlin:20200526T120000\r\n\
DTEND;TZID=Europe/Berlin:20200526T130000\r\n\
SUMMARY:Planning\r\n\
SEQUENCE:2\r\n\
ORGANIZER;CN=Org:MAILTO:org@example.com\r\n\
ATTENDEE;CN=Guest;PARTSTAT=ACCEPTED:mailto:guest@example.com\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn parses_reply_with_zoned_times() {
        let parsed = parse_calendar_file(REPLY, chrono_tz::UTC).unwrap();
        assert_eq!(parsed.method, CalendarMethod::Reply);
        assert_eq!(parsed.contents.len(), 1);

        let event = &parsed.contents[0].event;
        assert_eq!(event.uid.as_deref(), Some("abc-123@sealcal"));
        assert_eq!(event.start_time, Utc.with_ymd_and_hms(2020, 5, 26, 10, 0, 0).unwrap());
        assert_eq!(event.end_time, Utc.with_ymd_and_hms(2020, 5, 26, 11, 0, 0).unwrap());
        assert_eq!(event.sequence, 2);
        assert_eq!(event.organizer.as_deref(), Some("org@example.com"));
        assert_eq!(event.attendees[0].address.address, "guest@example.com");
        assert_eq!(event.attendees[0].address.name, "Guest");
        assert_eq!(event.attendees[0].status, AttendeeStatus::Accepted);
    }

    #[test]
    fn parses_all_day_rule_and_alarms() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:weekly@test\r\n\
DTSTART;VALUE=DATE:20200504\r\n\
DTEND;VALUE=DATE:20200505\r\n\
SUMMARY:Bins\r\n\
RRULE:FREQ=WEEKLY;INTERVAL=2;UNTIL=20200601\r\n\
BEGIN:VALARM\r\n\
ACTION:DISPLAY\r\n\
DESCRIPTION:Reminder\r\n\
TRIGGER:-PT30M\r\n\
END:VALARM\r\n\
BEGIN:VALARM\r\n\
ACTION:DISPLAY\r\n\
DESCRIPTION:Reminder\r\n\
TRIGGER:-PT7M\r\n\
END:VALARM\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let parsed = parse_calendar_file(ics, Berlin).unwrap();
        assert_eq!(parsed.method, CalendarMethod::Publish);
        let item = &parsed.contents[0];
        assert_eq!(item.event.start_time, Utc.with_ymd_and_hms(2020, 5, 4, 0, 0, 0).unwrap());
        let rule = item.event.repeat_rule.as_ref().unwrap();
        assert_eq!(rule.frequency, RepeatPeriod::Weekly);
        assert_eq!(rule.interval, 2);
        assert_eq!(rule.end_type, EndType::UntilDate);
        assert_eq!(
            rule.end_value,
            Some(Utc.with_ymd_and_hms(2020, 6, 2, 0, 0, 0).unwrap().timestamp_millis())
        );
        // -PT7M has no matching alarm interval and is dropped.
        assert_eq!(item.alarms, vec![AlarmInterval::ThirtyMinutes]);
    }

    #[test]
    fn floating_times_use_given_zone() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
METHOD:REQUEST\r\n\
BEGIN:VEVENT\r\n\
UID:floating@test\r\n\
DTSTART:20200526T090000\r\n\
DURATION:PT45M\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let parsed = parse_calendar_file(ics, Berlin).unwrap();
        assert_eq!(parsed.method, CalendarMethod::Request);
        let event = &parsed.contents[0].event;
        assert_eq!(event.start_time, Utc.with_ymd_and_hms(2020, 5, 26, 7, 0, 0).unwrap());
        assert_eq!(event.end_time - event.start_time, Duration::minutes(45));
        assert_eq!(event.summary, "");
    }

    #[test]
    fn event_without_uid_is_skipped() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
DTSTART:20200526T090000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";
        let parsed = parse_calendar_file(ics, Berlin).unwrap();
        assert!(parsed.contents.is_empty());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_calendar_file("this is not a calendar", Berlin).is_err());
    }
}
