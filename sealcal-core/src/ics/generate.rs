//! Outbound calendar file generation.

use chrono::{DateTime, Duration, Utc};
use icalendar::{Alarm, Calendar, Component, EventLike, Property, Trigger, ValueType};

use crate::error::{CalendarError, CalendarResult};
use crate::event::{AlarmInfo, CalendarEvent, EndType, RepeatRule};
use crate::ics::CalendarMethod;
use crate::time_zone::is_all_day_event;

/// Render `event` as an iTIP message with the given method.
///
/// Alarms are only included for REQUEST and PUBLISH, where the receiver may
/// adopt them. CANCEL marks the event as cancelled.
pub fn make_invitation_file(
    event: &CalendarEvent,
    alarms: &[AlarmInfo],
    method: CalendarMethod,
    now: DateTime<Utc>,
) -> CalendarResult<String> {
    let uid = event
        .uid
        .as_deref()
        .ok_or_else(|| CalendarError::IcsGenerate("event has no uid".to_string()))?;

    let mut cal = Calendar::new();
    cal.append_property(Property::new("METHOD", method.as_ics_str()));

    let mut ics_event = icalendar::Event::new();
    ics_event.uid(uid);
    ics_event.add_property("DTSTAMP", now.format("%Y%m%dT%H%M%SZ").to_string());
    ics_event.add_property("SEQUENCE", event.sequence.to_string());

    let all_day = is_all_day_event(event);
    add_time_property(&mut ics_event, "DTSTART", event.start_time, all_day);
    add_time_property(&mut ics_event, "DTEND", event.end_time, all_day);

    ics_event.summary(&event.summary);
    if !event.description.is_empty() {
        ics_event.description(&event.description);
    }
    if !event.location.is_empty() {
        ics_event.location(&event.location);
    }

    if let Some(rule) = &event.repeat_rule {
        ics_event.add_property("RRULE", rrule_value(rule, all_day));
    }

    if method == CalendarMethod::Cancel {
        ics_event.add_property("STATUS", "CANCELLED");
    }

    if let Some(organizer) = &event.organizer {
        ics_event.append_property(Property::new("ORGANIZER", format!("mailto:{organizer}")));
    }

    for attendee in &event.attendees {
        let mut prop = Property::new("ATTENDEE", format!("mailto:{}", attendee.address.address));
        if !attendee.address.name.is_empty() {
            prop.add_parameter("CN", &attendee.address.name);
        }
        prop.add_parameter("PARTSTAT", attendee.status.as_ics_str());
        prop.add_parameter("RSVP", "TRUE");
        ics_event.append_multi_property(prop);
    }

    if matches!(method, CalendarMethod::Request | CalendarMethod::Publish) {
        for alarm in alarms {
            let trigger = Trigger::before_start(alarm.trigger.duration());
            ics_event.alarm(Alarm::display("Reminder", trigger));
        }
    }

    cal.push(ics_event.done());
    Ok(cal.done().to_string())
}

fn add_time_property(
    ics_event: &mut icalendar::Event,
    name: &str,
    time: DateTime<Utc>,
    all_day: bool,
) {
    if all_day {
        let mut prop = Property::new(name, time.format("%Y%m%d").to_string());
        prop.append_parameter(ValueType::Date);
        ics_event.append_property(prop);
    } else {
        ics_event.add_property(name, time.format("%Y%m%dT%H%M%SZ").to_string());
    }
}

/// UNTIL is stored exclusive and written inclusive.
fn rrule_value(rule: &RepeatRule, all_day: bool) -> String {
    let mut value = format!("FREQ={};INTERVAL={}", rule.frequency.as_ics_str(), rule.interval);
    match rule.end_type {
        EndType::Never => {}
        EndType::Count => {
            if let Some(count) = rule.occurrence_count() {
                value.push_str(&format!(";COUNT={count}"));
            }
        }
        EndType::UntilDate => {
            if let Some(until) = rule.until() {
                let until = if all_day {
                    (until - Duration::days(1)).format("%Y%m%d").to_string()
                } else {
                    (until - Duration::seconds(1)).format("%Y%m%dT%H%M%SZ").to_string()
                };
                value.push_str(&format!(";UNTIL={until}"));
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AlarmInterval, Attendee, AttendeeStatus, RepeatPeriod};
    use crate::ics::parse_calendar_file;
    use chrono::TimeZone;

    fn meeting() -> CalendarEvent {
        let mut event = CalendarEvent::new(
            Utc.with_ymd_and_hms(2020, 5, 26, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 5, 26, 11, 0, 0).unwrap(),
        );
        event.uid = Some("meeting@sealcal".to_string());
        event.summary = "Planning".to_string();
        event.organizer = Some("org@example.com".to_string());
        event.sequence = 3;
        let mut guest = Attendee::new("guest@example.com");
        guest.address.name = "Guest".to_string();
        event.attendees = vec![guest];
        event
    }

    #[test]
    fn request_carries_method_alarms_and_attendees() {
        let now = Utc.with_ymd_and_hms(2020, 5, 20, 8, 0, 0).unwrap();
        let alarms = vec![AlarmInfo::new("a1", AlarmInterval::OneHour)];
        let ics = make_invitation_file(&meeting(), &alarms, CalendarMethod::Request, now).unwrap();

        assert!(ics.contains("METHOD:REQUEST"));
        assert!(ics.contains("DTSTART:20200526T100000Z"));
        assert!(ics.contains("DTSTAMP:20200520T080000Z"));
        assert!(ics.contains("BEGIN:VALARM"));

        let parsed = parse_calendar_file(&ics, chrono_tz::UTC).unwrap();
        assert_eq!(parsed.method, CalendarMethod::Request);
        let item = &parsed.contents[0];
        assert_eq!(item.event.sequence, 3);
        assert_eq!(item.event.organizer.as_deref(), Some("org@example.com"));
        assert_eq!(item.event.attendees[0].address.name, "Guest");
        assert_eq!(item.event.attendees[0].status, AttendeeStatus::NeedsAction);
        assert_eq!(item.alarms, vec![AlarmInterval::OneHour]);
    }

    #[test]
    fn reply_and_cancel_omit_alarms() {
        let now = Utc::now();
        let alarms = vec![AlarmInfo::new("a1", AlarmInterval::OneHour)];

        let reply = make_invitation_file(&meeting(), &alarms, CalendarMethod::Reply, now).unwrap();
        assert!(reply.contains("METHOD:REPLY"));
        assert!(!reply.contains("BEGIN:VALARM"));

        let cancel = make_invitation_file(&meeting(), &alarms, CalendarMethod::Cancel, now).unwrap();
        assert!(cancel.contains("STATUS:CANCELLED"));
    }

    #[test]
    fn all_day_until_is_written_inclusive() {
        let mut event = CalendarEvent::new(
            Utc.with_ymd_and_hms(2020, 5, 4, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 5, 5, 0, 0, 0).unwrap(),
        );
        event.uid = Some("bins@sealcal".to_string());
        let mut rule = RepeatRule::new(RepeatPeriod::Weekly, 2, "Europe/Berlin");
        rule.end_type = EndType::UntilDate;
        rule.end_value = Some(Utc.with_ymd_and_hms(2020, 6, 2, 0, 0, 0).unwrap().timestamp_millis());
        event.repeat_rule = Some(rule.clone());

        let ics = make_invitation_file(&event, &[], CalendarMethod::Publish, Utc::now()).unwrap();
        assert!(ics.contains("DTSTART;VALUE=DATE:20200504"));
        assert!(ics.contains("RRULE:FREQ=WEEKLY;INTERVAL=2;UNTIL=20200601"));

        let parsed = parse_calendar_file(&ics, chrono_tz::Europe::Berlin).unwrap();
        let parsed_rule = parsed.contents[0].event.repeat_rule.clone().unwrap();
        assert_eq!(parsed_rule.end_value, rule.end_value);
    }

    #[test]
    fn event_without_uid_is_rejected() {
        let mut event = meeting();
        event.uid = None;
        let result = make_invitation_file(&event, &[], CalendarMethod::Request, Utc::now());
        assert!(matches!(result, Err(CalendarError::IcsGenerate(_))));
    }
}
