//! Date and time-zone arithmetic shared by recurrence expansion, alarm
//! scheduling and the event editor.
//!
//! All instants are `DateTime<Utc>`. Calendar arithmetic (adding days, months,
//! years) happens on wall-clock time in an explicit zone so that a daily event
//! stays at 09:00 across daylight-saving changes.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, Months, NaiveDate, NaiveDateTime, NaiveTime,
    Offset, TimeZone, Utc,
};
use chrono_tz::Tz;
use tracing::warn;

use crate::event::{AlarmInterval, CalendarEvent, RepeatPeriod};

/// Events lasting longer than this are expanded month-clipped.
pub const LONG_EVENT_THRESHOLD_DAYS: i64 = 15;

/// Half-open `[start, end)` range covering one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarMonthTimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Resolve `zone` to a usable IANA zone.
///
/// Falls back to `fallback` and finally to the zone matching the current
/// local UTC offset. Invalid zones are logged, never surfaced.
pub fn valid_time_zone(zone: &str, fallback: Option<&str>) -> Tz {
    if let Ok(tz) = zone.parse::<Tz>() {
        return tz;
    }
    if let Some(tz) = fallback.and_then(|f| f.parse::<Tz>().ok()) {
        warn!(zone, fallback = tz.name(), "Time zone is not valid, falling back");
        return tz;
    }
    let actual = local_offset_zone();
    warn!(zone, fallback = actual.name(), "Fallback time zone is not valid, using local offset");
    actual
}

/// The system time zone, validated.
pub fn local_time_zone() -> Tz {
    match iana_time_zone::get_timezone() {
        Ok(name) => valid_time_zone(&name, None),
        Err(e) => {
            warn!(error = %e, "Could not determine system time zone");
            local_offset_zone()
        }
    }
}

/// Fixed-offset zone (`Etc/GMT±h`) for the current local UTC offset.
///
/// `Etc/GMT` names have inverted signs; offsets that are not whole hours have
/// no such zone and map to UTC.
fn local_offset_zone() -> Tz {
    let offset_secs = chrono::Local::now().offset().local_minus_utc();
    if offset_secs == 0 || offset_secs % 3600 != 0 {
        return Tz::UTC;
    }
    let hours = offset_secs / 3600;
    let name = if hours > 0 {
        format!("Etc/GMT-{hours}")
    } else {
        format!("Etc/GMT+{}", -hours)
    };
    name.parse().unwrap_or(Tz::UTC)
}

/// Interpret a wall-clock time in `zone`.
///
/// Ambiguous times (clocks going back) take the earlier instant. Times that do
/// not exist (clocks going forward) keep the offset in effect before the gap,
/// which moves them forward by the gap length.
pub fn local_to_utc(zone: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let day_before = naive.checked_sub_signed(Duration::days(1)).unwrap_or(naive);
            let before_gap = zone.offset_from_utc_datetime(&day_before).fix().local_minus_utc();
            match naive.checked_sub_signed(Duration::seconds(before_gap.into())) {
                Some(utc) => utc.and_utc(),
                None if before_gap < 0 => DateTime::<Utc>::MAX_UTC,
                None => DateTime::<Utc>::MIN_UTC,
            }
        }
    }
}

/// Advance `date` by `interval` units of `period`, computed on wall-clock time
/// in `zone`. Month and year steps clamp to the last day of shorter months.
///
/// Results past the representable range saturate to `MAX_UTC` (or `MIN_UTC`
/// for negative intervals).
pub fn increment_by_repeat_period(
    date: DateTime<Utc>,
    period: RepeatPeriod,
    interval: i64,
    zone: Tz,
) -> DateTime<Utc> {
    checked_increment_by_repeat_period(date, period, interval, zone).unwrap_or(if interval < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Like [`increment_by_repeat_period`], `None` when the result is not
/// representable.
pub fn checked_increment_by_repeat_period(
    date: DateTime<Utc>,
    period: RepeatPeriod,
    interval: i64,
    zone: Tz,
) -> Option<DateTime<Utc>> {
    let local = date.with_timezone(&zone).naive_local();
    let shifted = match period {
        RepeatPeriod::Daily => local.checked_add_signed(Duration::try_days(interval)?)?,
        RepeatPeriod::Weekly => local.checked_add_signed(Duration::try_weeks(interval)?)?,
        RepeatPeriod::Monthly => add_months(local, interval)?,
        RepeatPeriod::Annually => add_months(local, interval.checked_mul(12)?)?,
    };
    let utc = local_to_utc(zone, shifted);
    (utc != DateTime::<Utc>::MAX_UTC && utc != DateTime::<Utc>::MIN_UTC).then_some(utc)
}

fn add_months(local: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let count = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        local.checked_add_months(count)
    } else {
        local.checked_sub_months(count)
    }
}

/// UTC midnight of the calendar date `date` has in `zone`.
///
/// This is how all-day events are stored.
pub fn all_day_date_utc_from_zone(date: DateTime<Utc>, zone: Tz) -> DateTime<Utc> {
    date.with_timezone(&zone)
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc()
}

/// Local midnight in `zone` of the calendar date `utc_date` has in UTC.
///
/// Inverse of [`all_day_date_utc_from_zone`].
pub fn all_day_date_for_timezone(utc_date: DateTime<Utc>, zone: Tz) -> DateTime<Utc> {
    local_to_utc(zone, utc_date.date_naive().and_time(NaiveTime::MIN))
}

pub fn start_of_day_with_zone(date: DateTime<Utc>, zone: Tz) -> DateTime<Utc> {
    let day = date.with_timezone(&zone).date_naive();
    local_to_utc(zone, day.and_time(NaiveTime::MIN))
}

pub fn start_of_next_day_with_zone(date: DateTime<Utc>, zone: Tz) -> DateTime<Utc> {
    let day = date.with_timezone(&zone).date_naive() + Duration::days(1);
    local_to_utc(zone, day.and_time(NaiveTime::MIN))
}

/// Local midnight of `date` in `zone`.
pub fn date_start_in_zone(date: NaiveDate, zone: Tz) -> DateTime<Utc> {
    local_to_utc(zone, date.and_time(NaiveTime::MIN))
}

/// Calendar date of `instant` in `zone`.
pub fn local_date(instant: DateTime<Utc>, zone: Tz) -> NaiveDate {
    instant.with_timezone(&zone).date_naive()
}

fn is_utc_midnight(dt: DateTime<Utc>) -> bool {
    dt.time() == NaiveTime::MIN
}

pub fn is_all_day_event_by_times(start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    is_utc_midnight(start) && is_utc_midnight(end)
}

pub fn is_all_day_event(event: &CalendarEvent) -> bool {
    is_all_day_event_by_times(event.start_time, event.end_time)
}

/// Start of `event` as shown in `zone`: local midnight for all-day events.
pub fn event_start(event: &CalendarEvent, zone: Tz) -> DateTime<Utc> {
    if is_all_day_event(event) {
        all_day_date_for_timezone(event.start_time, zone)
    } else {
        event.start_time
    }
}

/// End of `event` as shown in `zone`: local midnight for all-day events.
pub fn event_end(event: &CalendarEvent, zone: Tz) -> DateTime<Utc> {
    if is_all_day_event(event) {
        all_day_date_for_timezone(event.end_time, zone)
    } else {
        event.end_time
    }
}

/// Whole-day difference between the local dates of `a` and `b`.
///
/// Unlike dividing the millisecond difference this is not thrown off by
/// 23 or 25 hour days.
pub fn diff_in_days(a: DateTime<Utc>, b: DateTime<Utc>, zone: Tz) -> i64 {
    (local_date(a, zone) - local_date(b, zone)).num_days()
}

pub fn is_long_event(event: &CalendarEvent, zone: Tz) -> bool {
    event_end(event, zone) - event_start(event, zone) > Duration::days(LONG_EVENT_THRESHOLD_DAYS)
}

/// The month containing `date` in `zone`.
pub fn month_range(date: DateTime<Utc>, zone: Tz) -> CalendarMonthTimeRange {
    let day = local_date(date, zone);
    let first = day.with_day(1).unwrap_or(day);
    let next = first
        .checked_add_months(Months::new(1))
        .unwrap_or(NaiveDate::MAX);
    CalendarMonthTimeRange {
        start: date_start_in_zone(first, zone),
        end: date_start_in_zone(next, zone),
    }
}

/// Parse a time of day as typed into the editor.
///
/// Accepts `HH:MM` (24 hour) and `h:mm am|pm` (12 hour).
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let lower = value.trim().to_ascii_lowercase();
    let (clock, meridiem) = if let Some(rest) = lower.strip_suffix("am") {
        (rest.trim_end(), Some(false))
    } else if let Some(rest) = lower.strip_suffix("pm") {
        (rest.trim_end(), Some(true))
    } else {
        (lower.as_str(), None)
    };

    let (hours, minutes) = clock.split_once(':')?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return None;
    }
    if !hours.bytes().chain(minutes.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;

    match meridiem {
        Some(pm) => {
            if !(1..=12).contains(&hours) {
                return None;
            }
            hours %= 12;
            if pm {
                hours += 12;
            }
        }
        None if hours > 23 => return None,
        None => {}
    }
    NaiveTime::from_hms_opt(hours, minutes, 0)
}

/// Format a time of day for the editor.
pub fn time_string(time: NaiveTime, am_pm: bool) -> String {
    if am_pm {
        time.format("%-I:%M %P").to_string()
    } else {
        time.format("%H:%M").to_string()
    }
}

/// The instant an alarm with `trigger` fires for an occurrence starting at
/// `date`. Day and week offsets are calendar arithmetic in `zone`.
pub fn calculate_alarm_time(date: DateTime<Utc>, trigger: AlarmInterval, zone: Tz) -> DateTime<Utc> {
    match trigger {
        AlarmInterval::FiveMinutes
        | AlarmInterval::TenMinutes
        | AlarmInterval::ThirtyMinutes
        | AlarmInterval::OneHour => date - trigger.duration(),
        AlarmInterval::OneDay => increment_by_repeat_period(date, RepeatPeriod::Daily, -1, zone),
        AlarmInterval::TwoDays => increment_by_repeat_period(date, RepeatPeriod::Daily, -2, zone),
        AlarmInterval::ThreeDays => increment_by_repeat_period(date, RepeatPeriod::Daily, -3, zone),
        AlarmInterval::OneWeek => increment_by_repeat_period(date, RepeatPeriod::Weekly, -1, zone),
    }
}
