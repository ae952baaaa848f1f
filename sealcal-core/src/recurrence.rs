//! Expansion of events into per-day buckets for a visible month.
//!
//! The calendar view keeps a map from local midnight to the events visible on
//! that day. These functions add one event (or every occurrence of a recurring
//! event) to that map. They hold no state and can be called from anywhere.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::error::{CalendarError, CalendarResult};
use crate::event::{CalendarEvent, RepeatPeriod, is_same_event};
use crate::time_zone::{
    CalendarMonthTimeRange, all_day_date_for_timezone, all_day_date_utc_from_zone,
    checked_increment_by_repeat_period, diff_in_days, event_end, event_start,
    increment_by_repeat_period, is_all_day_event,
    is_long_event, start_of_day_with_zone, valid_time_zone,
};

/// Upper bound on days walked for a single long event within one month.
const MAX_LONG_EVENT_ITERATIONS: usize = 10_000;

/// Events per local day, keyed by the day's midnight instant.
pub type DayBuckets = BTreeMap<DateTime<Utc>, Vec<CalendarEvent>>;

/// Insert `event` into its day bucket, keeping the bucket sorted by start and
/// skipping events that are already present.
fn insert_into_day(events: &mut DayBuckets, day: DateTime<Utc>, event: &CalendarEvent) {
    let bucket = events.entry(day).or_default();
    if bucket.iter().any(|e| is_same_event(e, event)) {
        return;
    }
    let index = bucket.partition_point(|e| e.start_time <= event.start_time);
    bucket.insert(index, event.clone());
}

/// Add any event to `events`, picking the right expansion for it.
pub fn expand_event(
    events: &mut DayBuckets,
    event: &CalendarEvent,
    month: &CalendarMonthTimeRange,
    zone: Tz,
) -> CalendarResult<()> {
    if event.repeat_rule.is_some() {
        add_days_for_recurring_event(events, event, month, zone)
    } else if is_long_event(event, zone) {
        add_days_for_long_event(events, event, month, zone)
    } else {
        add_days_for_event(events, event, month, zone);
        Ok(())
    }
}

/// Add a short event to every day from its start day up to (not including)
/// its end.
///
/// Only events starting inside `month` are added; their trailing days may
/// fall into the following month.
pub fn add_days_for_event(
    events: &mut DayBuckets,
    event: &CalendarEvent,
    month: &CalendarMonthTimeRange,
    zone: Tz,
) {
    let start = event_start(event, zone);
    let end = event_end(event, zone);

    if start < month.start || start >= month.end {
        return;
    }

    let mut day = start_of_day_with_zone(start, zone);
    while day < end {
        if end >= month.start {
            insert_into_day(events, day, event);
        }
        day = increment_by_repeat_period(day, RepeatPeriod::Daily, 1, zone);
    }
}

/// Add a long event to the days it covers within `month` only.
///
/// Exceeding the iteration ceiling means the day walk is not advancing; that
/// is reported as [`CalendarError::InfiniteLoop`] and must not be recovered
/// from.
pub fn add_days_for_long_event(
    events: &mut DayBuckets,
    event: &CalendarEvent,
    month: &CalendarMonthTimeRange,
    zone: Tz,
) -> CalendarResult<()> {
    add_days_for_long_event_with_limit(events, event, month, zone, MAX_LONG_EVENT_ITERATIONS)
}

fn add_days_for_long_event_with_limit(
    events: &mut DayBuckets,
    event: &CalendarEvent,
    month: &CalendarMonthTimeRange,
    zone: Tz,
    max_iterations: usize,
) -> CalendarResult<()> {
    let start = event_start(event, zone);
    let end = event_end(event, zone);

    let mut day = if start >= month.start && start < month.end {
        start_of_day_with_zone(start, zone)
    } else if start < month.start {
        month.start
    } else {
        return Ok(());
    };

    let end_in_month = if end > month.start && end <= month.end {
        end
    } else if end > month.end {
        month.end
    } else {
        return Ok(());
    };

    let mut iterations = 0;
    while day < end_in_month {
        insert_into_day(events, day, event);
        day = increment_by_repeat_period(day, RepeatPeriod::Daily, 1, zone);
        iterations += 1;
        if iterations > max_iterations {
            return Err(CalendarError::InfiniteLoop(format!(
                "add_days_for_long_event for event {:?}",
                event.uid
            )));
        }
    }
    Ok(())
}

/// Add every occurrence of a recurring event that is visible in `month`.
///
/// Occurrences are computed from the first start (`start + interval * n`)
/// in the rule's zone, so month-end clamping does not drift. All-day events
/// are computed in the display zone instead, which is the zone their UTC
/// encoding is relative to.
pub fn add_days_for_recurring_event(
    events: &mut DayBuckets,
    event: &CalendarEvent,
    month: &CalendarMonthTimeRange,
    zone: Tz,
) -> CalendarResult<()> {
    let Some(rule) = &event.repeat_rule else {
        add_days_for_event(events, event, month, zone);
        return Ok(());
    };

    let all_day = is_all_day_event(event);
    let repeat_zone = if all_day {
        zone
    } else {
        valid_time_zone(&rule.time_zone, Some(zone.name()))
    };

    let event_start_time = event_start(event, zone);
    let event_end_time = event_end(event, zone);

    let end_occurrences = rule.occurrence_count();
    let repeat_end_time = rule.until().map(|until| {
        if all_day {
            all_day_date_for_timezone(until, zone)
        } else {
            until
        }
    });

    let duration_days = diff_in_days(event_end_time, event_start_time, zone);
    let duration: Duration = event_end_time - event_start_time;
    let interval = i64::from(rule.interval.max(1));

    let mut calc_start = event_start_time;
    let mut iteration: i64 = 1;

    while end_occurrences.is_none_or(|n| iteration <= n)
        && repeat_end_time.is_none_or(|until| calc_start < until)
        && calc_start < month.end
    {
        let calc_end = if all_day {
            checked_increment_by_repeat_period(calc_start, RepeatPeriod::Daily, duration_days, repeat_zone)
        } else {
            calc_start.checked_add_signed(duration)
        }
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

        if calc_end >= month.start {
            let mut occurrence = event.clone();
            if all_day {
                occurrence.start_time = all_day_date_utc_from_zone(calc_start, zone);
                occurrence.end_time = all_day_date_utc_from_zone(calc_end, zone);
            } else {
                occurrence.start_time = calc_start;
                occurrence.end_time = calc_end;
            }

            if is_long_event(&occurrence, zone) {
                add_days_for_long_event(events, &occurrence, month, zone)?;
            } else {
                add_days_for_event(events, &occurrence, month, zone);
            }
        }

        let Some(next) = checked_increment_by_repeat_period(
            event_start_time,
            rule.frequency,
            interval.saturating_mul(iteration),
            repeat_zone,
        ) else {
            break;
        };
        calc_start = next;
        iteration += 1;
    }

    Ok(())
}
