//! Local alarm scheduling.
//!
//! For each (event, user alarm) pair the scheduler computes the next alarm
//! instants and arms one timer per instant. Timers are tokio tasks; the
//! scheduler keeps their abort handles keyed by an identifier derived from the
//! user alarm id so that deleting the alarm cancels every armed occurrence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

use crate::error::{CalendarError, CalendarResult};
use crate::event::{AlarmInterval, CalendarEvent, IdTuple, RepeatRule, UserAlarmInfo};
use crate::time_zone::{
    all_day_date_for_timezone, calculate_alarm_time, checked_increment_by_repeat_period, event_start,
    is_all_day_event_by_times, local_date, valid_time_zone,
};
use crate::worker::{
    CalendarWorker, EntityType, EntityUpdate, NotificationAction, Notifier, OperationType,
};

/// How many future occurrences of a recurring event get a timer.
pub const OCCURRENCES_SCHEDULED_AHEAD: usize = 10;

/// Longest single sleep. Longer delays are slept in chunks of this size.
pub const MAX_TIMER_DELAY: std::time::Duration = std::time::Duration::from_millis(0x7FFF_FFFF);

/// Walk the occurrences of a recurring event and report alarm instants that
/// lie after `now`.
///
/// Occurrences are computed in `local_zone` for all-day events (their UTC
/// encoding is relative to it) and in `repeat_zone` otherwise. `callback`
/// receives the alarm instant and the occurrence index. Iteration stops after
/// [`OCCURRENCES_SCHEDULED_AHEAD`] callbacks or when the rule ends. Past
/// occurrences are skipped without counting against the look-ahead.
#[allow(clippy::too_many_arguments)]
pub fn iterate_event_occurrences(
    now: DateTime<Utc>,
    repeat_zone: Tz,
    event_start: DateTime<Utc>,
    event_end: DateTime<Utc>,
    rule: &RepeatRule,
    alarm_trigger: AlarmInterval,
    local_zone: Tz,
    mut callback: impl FnMut(DateTime<Utc>, usize),
) {
    let all_day = is_all_day_event_by_times(event_start, event_end);
    let calc_start = if all_day {
        all_day_date_for_timezone(event_start, local_zone)
    } else {
        event_start
    };
    let end_date = rule.until().map(|until| {
        if all_day {
            all_day_date_for_timezone(until, local_zone)
        } else {
            until
        }
    });
    let count = rule
        .occurrence_count()
        .map(|n| usize::try_from(n).unwrap_or(usize::MAX));
    let zone = if all_day { local_zone } else { repeat_zone };
    let interval = i64::from(rule.interval.max(1));

    let mut occurrences = 0usize;
    let mut future_occurrences = 0usize;

    while future_occurrences < OCCURRENCES_SCHEDULED_AHEAD
        && count.is_none_or(|n| occurrences < n)
    {
        let steps = i64::try_from(occurrences).unwrap_or(i64::MAX);
        let Some(occurrence) = checked_increment_by_repeat_period(
            calc_start,
            rule.frequency,
            interval.saturating_mul(steps),
            zone,
        ) else {
            break;
        };
        if end_date.is_some_and(|end| occurrence >= end) {
            break;
        }

        let alarm_time = calculate_alarm_time(occurrence, alarm_trigger, local_zone);
        if alarm_time > now {
            callback(alarm_time, occurrences);
            future_occurrences += 1;
        }
        occurrences += 1;
    }
}

/// Timer identifier for one occurrence of a recurring event's alarm.
fn occurrence_identifier(alarm_id: &str, occurrence: usize) -> String {
    format!("{alarm_id}#{occurrence}")
}

/// Schedules and cancels local alarm notifications.
pub struct AlarmScheduler {
    worker: Arc<dyn CalendarWorker>,
    notifier: Arc<dyn Notifier>,
    local_zone: Tz,
    scheduled: Mutex<HashMap<String, AbortHandle>>,
    /// One-shot gates keyed by event element id. A UserAlarmInfo can arrive
    /// before its event; scheduling waits until the event CREATE/UPDATE has
    /// been seen.
    pending_events: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl AlarmScheduler {
    pub fn new(worker: Arc<dyn CalendarWorker>, notifier: Arc<dyn Notifier>, local_zone: Tz) -> Self {
        AlarmScheduler {
            worker,
            notifier,
            local_zone,
            scheduled: Mutex::new(HashMap::new()),
            pending_events: Mutex::new(HashMap::new()),
        }
    }

    /// Load every event with alarms and schedule them.
    pub async fn schedule_alarms_locally(&self) -> CalendarResult<()> {
        let events = self.worker.load_alarm_events().await?;
        info!(count = events.len(), "Scheduling local alarms");
        for item in events {
            self.schedule_user_alarm_info(&item.event, &item.user_alarm_info);
        }
        Ok(())
    }

    pub fn schedule_user_alarm_info(&self, event: &CalendarEvent, user_alarm: &UserAlarmInfo) {
        self.schedule_user_alarm_info_at(event, user_alarm, Utc::now());
    }

    /// Arm timers for `user_alarm` on `event` as seen at `now`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule_user_alarm_info_at(
        &self,
        event: &CalendarEvent,
        user_alarm: &UserAlarmInfo,
        now: DateTime<Utc>,
    ) {
        let alarm_id = user_alarm.id.element_id.as_str();
        let trigger = user_alarm.alarm_info.trigger;

        match &event.repeat_rule {
            Some(rule) => {
                let repeat_zone = valid_time_zone(&rule.time_zone, Some(self.local_zone.name()));
                iterate_event_occurrences(
                    now,
                    repeat_zone,
                    event.start_time,
                    event.end_time,
                    rule,
                    trigger,
                    self.local_zone,
                    |time, occurrence| {
                        self.schedule_notification(occurrence_identifier(alarm_id, occurrence), event, time, now);
                    },
                );
            }
            None => {
                let start = event_start(event, self.local_zone);
                let time = calculate_alarm_time(start, trigger, self.local_zone);
                if time > now {
                    self.schedule_notification(alarm_id.to_string(), event, time, now);
                }
            }
        }
    }

    fn schedule_notification(
        &self,
        identifier: String,
        event: &CalendarEvent,
        time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let delay = (time - now).to_std().unwrap_or_default();
        let Some(deadline) = Instant::now().checked_add(delay) else {
            warn!(identifier = %identifier, %time, "Alarm too far in the future, not arming");
            return;
        };
        let notifier = Arc::clone(&self.notifier);
        let zone = self.local_zone;
        let event = event.clone();

        debug!(identifier = %identifier, %time, "Arming alarm");
        let handle = tokio::spawn(async move {
            run_at(deadline).await;
            let (title, body) = notification_text(&event, zone, Utc::now());
            notifier.show_notification(&title, &body, NotificationAction::OpenAgenda);
        })
        .abort_handle();

        let mut scheduled = lock(&self.scheduled);
        scheduled.retain(|_, handle| !handle.is_finished());
        if let Some(previous) = scheduled.insert(identifier, handle) {
            previous.abort();
        }
    }

    /// Cancel every timer armed for the user alarm `alarm_id`, including each
    /// occurrence of a recurring event.
    ///
    /// Cancelling alarms that already fired or were never armed is a no-op.
    pub fn cancel_alarms(&self, alarm_id: &str) {
        let occurrence_prefix = format!("{alarm_id}#");
        lock(&self.scheduled).retain(|identifier, handle| {
            if identifier == alarm_id || identifier.starts_with(&occurrence_prefix) {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Cancel everything, e.g. on logout.
    pub fn cancel_all(&self) {
        for (_, handle) in lock(&self.scheduled).drain() {
            handle.abort();
        }
    }

    /// Identifiers of timers that have not fired yet, sorted.
    pub fn scheduled_identifiers(&self) -> Vec<String> {
        let mut scheduled = lock(&self.scheduled);
        scheduled.retain(|_, handle| !handle.is_finished());
        let mut ids: Vec<String> = scheduled.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Mark the event with `element_id` as available to waiting alarms.
    pub fn event_available(&self, element_id: &str) {
        lock(&self.pending_events)
            .entry(element_id.to_string())
            .or_insert_with(|| watch::channel(false).0)
            .send_replace(true);
    }

    fn event_gate(&self, element_id: &str) -> watch::Receiver<bool> {
        lock(&self.pending_events)
            .entry(element_id.to_string())
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }

    /// Load a newly created UserAlarmInfo, wait for its event and schedule it.
    pub async fn user_alarm_created(&self, id: &IdTuple) -> CalendarResult<()> {
        let user_alarm = self.worker.load_user_alarm_info(id).await?;
        let Some(event_id) = user_alarm.alarm_info.calendar_ref.clone() else {
            warn!(alarm = %id.element_id, "UserAlarmInfo has no event reference");
            return Ok(());
        };

        let mut gate = self.event_gate(&event_id.element_id);
        gate.wait_for(|ready| *ready)
            .await
            .map_err(|e| CalendarError::Worker(format!("Event gate closed: {e}")))?;

        let event = self.worker.load_event(&event_id).await?;
        self.schedule_user_alarm_info(&event, &user_alarm);
        Ok(())
    }

    /// React to a batch of entity updates.
    ///
    /// Alarm creations are handled on spawned tasks because their event may
    /// only arrive in a later batch.
    pub fn entity_events_received(self: &Arc<Self>, updates: &[EntityUpdate]) {
        for update in updates {
            match (update.entity, update.operation) {
                (EntityType::UserAlarmInfo, OperationType::Create) => {
                    let scheduler = Arc::clone(self);
                    let id = update.id();
                    tokio::spawn(async move {
                        match scheduler.user_alarm_created(&id).await {
                            Ok(()) => {}
                            Err(e) if e.is_not_found() => {
                                info!(alarm = %id.element_id, error = %e, "Event or alarm were not found");
                            }
                            Err(e) => warn!(alarm = %id.element_id, error = %e, "Could not schedule alarm"),
                        }
                    });
                }
                (EntityType::UserAlarmInfo, OperationType::Delete) => {
                    self.cancel_alarms(&update.instance_id);
                }
                (EntityType::CalendarEvent, OperationType::Create | OperationType::Update) => {
                    self.event_available(&update.instance_id);
                }
                _ => {}
            }
        }
    }
}

impl Drop for AlarmScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sleep until `deadline`, in steps no longer than [`MAX_TIMER_DELAY`].
async fn run_at(deadline: Instant) {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining > MAX_TIMER_DELAY {
            sleep(MAX_TIMER_DELAY).await;
        } else {
            sleep_until(deadline).await;
            return;
        }
    }
}

fn notification_text(event: &CalendarEvent, zone: Tz, now: DateTime<Utc>) -> (String, String) {
    let start = event_start(event, zone).with_timezone(&zone);
    let when = if local_date(now, zone) == start.date_naive() {
        start.format("%H:%M").to_string()
    } else {
        start.format("%a, %b %-d %H:%M").to_string()
    };
    ("Reminder".to_string(), format!("{when} {}", event.summary))
}
