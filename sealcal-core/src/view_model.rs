//! Draft state for creating or editing one calendar event.
//!
//! The view model owns its draft until commit. Permission flags are derived
//! once at construction from the calendar the event lives in and never change
//! afterwards.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::error::{CalendarError, CalendarResult, ValidationError};
use crate::event::{
    AlarmInfo, AlarmInterval, Attendee, AttendeeStatus, CalendarEvent, CalendarGroupRoot,
    CalendarInfo, EndType, IdTuple, MailAddress, RepeatPeriod, RepeatRule, ShareCapability, User,
    generate_event_element_id, generate_uid, has_capability_on_group,
};
use crate::time_zone::{
    all_day_date_for_timezone, all_day_date_utc_from_zone, date_start_in_zone, event_end,
    event_start, increment_by_repeat_period, is_all_day_event, is_long_event, local_date,
    local_to_utc, parse_time, time_string,
};
use crate::worker::{CalendarWorker, UpdateDistributor};

/// Event ids are derived from timestamps; dates before the epoch are moved
/// into the current year instead.
const TIMESTAMP_ZERO_YEAR: i32 = 1970;

/// Length of a new event.
const DEFAULT_EVENT_MINUTES: i64 = 30;

/// How a repeating draft ends, as shown in the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatEnd {
    Never,
    Count(u32),
    /// Last day with an occurrence, inclusive.
    UntilDate(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatDraft {
    pub frequency: RepeatPeriod,
    pub interval: u32,
    pub end: RepeatEnd,
}

/// The signed-in user as far as the editor is concerned.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user: User,
    /// Enabled mail addresses. The first one is the default sender.
    pub mail_addresses: Vec<String>,
    pub am_pm: bool,
}

impl UserContext {
    fn owns_address(&self, address: &str) -> bool {
        self.mail_addresses
            .iter()
            .any(|own| own.eq_ignore_ascii_case(address))
    }
}

/// Collaborators and settings the editor needs.
#[derive(Clone)]
pub struct EditorContext {
    pub worker: Arc<dyn CalendarWorker>,
    pub distributor: Arc<dyn UpdateDistributor>,
    pub user: UserContext,
    pub zone: Tz,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitKind {
    /// Store as a new event, replacing `previous` if set. Used when a field the
    /// id or alarm times depend on changed.
    Create { previous: Option<CalendarEvent> },
    Update { previous: CalendarEvent },
}

/// What committing the draft would persist.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitPlan {
    pub event: CalendarEvent,
    pub alarms: Vec<AlarmInfo>,
    pub kind: CommitKind,
}

pub struct CalendarEventViewModel {
    pub summary: String,
    pub location: String,
    pub note: String,
    pub all_day: bool,
    pub start_date: NaiveDate,
    /// Last day of the event, inclusive, also for all-day events.
    pub end_date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub repeat: Option<RepeatDraft>,
    pub organizer: Option<String>,
    attendees: Vec<Attendee>,
    alarms: Arc<[AlarmInfo]>,
    going: AttendeeStatus,
    calendars: Vec<CalendarInfo>,
    selected_calendar: usize,
    existing_event: Option<CalendarEvent>,
    read_only: bool,
    can_modify_guests: bool,
    can_modify_own_attendance: bool,
    can_modify_organizer: bool,
    ctx: EditorContext,
}

impl CalendarEventViewModel {
    /// Build a view model for `existing_event`, or for a new event starting at
    /// `date`. `alarms` are the user's alarms already linked to the event.
    pub fn new(
        ctx: EditorContext,
        date: DateTime<Utc>,
        calendars: Vec<CalendarInfo>,
        existing_event: Option<CalendarEvent>,
        alarms: Vec<AlarmInfo>,
    ) -> CalendarResult<Self> {
        if calendars.is_empty() {
            return Err(CalendarError::NotFound("no calendar to put the event in".to_string()));
        }
        let zone = ctx.zone;
        let am_pm = ctx.user.am_pm;

        let event_calendar = existing_event
            .as_ref()
            .and_then(|e| e.owner_group.as_deref())
            .and_then(|group| calendars.iter().position(|c| c.group_root.id == group));

        // Events from files have no calendar yet and can always be edited.
        let shared = event_calendar.is_some_and(|i| calendars[i].shared);
        let read_only = event_calendar.is_some_and(|i| {
            calendars[i].shared
                && !has_capability_on_group(&ctx.user.user, &calendars[i].group, ShareCapability::Write)
        });
        let is_copy = existing_event.as_ref().is_some_and(|e| e.is_copy);
        let can_modify_guests = !shared && !is_copy;
        let attendees = existing_event
            .as_ref()
            .map(|e| e.attendees.clone())
            .unwrap_or_default();
        let can_modify_organizer = can_modify_guests && attendees.is_empty();

        let organizer = existing_event
            .as_ref()
            .and_then(|e| e.organizer.clone())
            .or_else(|| ctx.user.mail_addresses.first().cloned());

        let going = attendees
            .iter()
            .find(|a| ctx.user.owns_address(&a.address.address))
            .map(|a| a.status)
            .unwrap_or_default();

        let view_model = match &existing_event {
            Some(event) => {
                let all_day = is_all_day_event(event);
                let start = event_start(event, zone);
                let end = event_end(event, zone);
                let end_date = if all_day {
                    local_date(end, zone) - Duration::days(1)
                } else {
                    local_date(end, zone)
                };
                CalendarEventViewModel {
                    summary: event.summary.clone(),
                    location: event.location.clone(),
                    note: event.description.clone(),
                    all_day,
                    start_date: local_date(start, zone),
                    end_date,
                    start_time: time_string(start.with_timezone(&zone).time(), am_pm),
                    end_time: time_string(end.with_timezone(&zone).time(), am_pm),
                    repeat: event
                        .repeat_rule
                        .as_ref()
                        .map(|rule| repeat_draft_from_rule(rule, all_day, zone)),
                    organizer,
                    attendees,
                    alarms: Arc::from(alarms),
                    going,
                    calendars,
                    selected_calendar: event_calendar.unwrap_or(0),
                    existing_event: existing_event.clone(),
                    read_only,
                    can_modify_guests,
                    can_modify_own_attendance: !shared,
                    can_modify_organizer,
                    ctx,
                }
            }
            None => {
                let end = date + Duration::minutes(DEFAULT_EVENT_MINUTES);
                CalendarEventViewModel {
                    summary: String::new(),
                    location: String::new(),
                    note: String::new(),
                    all_day: false,
                    start_date: local_date(date, zone),
                    end_date: local_date(date, zone),
                    start_time: time_string(date.with_timezone(&zone).time(), am_pm),
                    end_time: time_string(end.with_timezone(&zone).time(), am_pm),
                    repeat: None,
                    organizer,
                    attendees,
                    alarms: Arc::from(alarms),
                    going,
                    calendars,
                    selected_calendar: 0,
                    existing_event: None,
                    read_only,
                    can_modify_guests,
                    can_modify_own_attendance: !shared,
                    can_modify_organizer,
                    ctx,
                }
            }
        };
        Ok(view_model)
    }

    /// Like [`CalendarEventViewModel::new`], loading the user's alarms for
    /// the existing event through the worker first.
    pub async fn init(
        ctx: EditorContext,
        date: DateTime<Utc>,
        calendars: Vec<CalendarInfo>,
        existing_event: Option<CalendarEvent>,
    ) -> CalendarResult<Self> {
        let mut alarms = Vec::new();
        if let (Some(event), Some(alarm_list)) = (&existing_event, &ctx.user.user.alarm_info_list) {
            for alarm_id in event.alarm_infos.iter().filter(|id| &id.list_id == alarm_list) {
                match ctx.worker.load_user_alarm_info(alarm_id).await {
                    Ok(user_alarm) => alarms.push(user_alarm.alarm_info),
                    Err(e) if e.is_not_found() => {
                        debug!(alarm = %alarm_id.element_id, "Linked alarm is gone");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Self::new(ctx, date, calendars, existing_event, alarms)
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn can_modify_guests(&self) -> bool {
        self.can_modify_guests
    }

    pub fn can_modify_own_attendance(&self) -> bool {
        self.can_modify_own_attendance
    }

    pub fn can_modify_organizer(&self) -> bool {
        self.can_modify_organizer
    }

    pub fn attendees(&self) -> &[Attendee] {
        &self.attendees
    }

    /// Alarms of the draft. Every edit replaces the whole slice, so comparing
    /// with [`Arc::ptr_eq`] tells whether anything changed.
    pub fn alarms(&self) -> Arc<[AlarmInfo]> {
        Arc::clone(&self.alarms)
    }

    pub fn going(&self) -> AttendeeStatus {
        self.going
    }

    pub fn calendars(&self) -> &[CalendarInfo] {
        &self.calendars
    }

    pub fn selected_calendar(&self) -> &CalendarInfo {
        &self.calendars[self.selected_calendar]
    }

    /// Move the draft to the calendar at `index`. Out-of-range indices are
    /// ignored.
    pub fn select_calendar(&mut self, index: usize) {
        if index < self.calendars.len() {
            self.selected_calendar = index;
        }
    }

    pub fn existing_event(&self) -> Option<&CalendarEvent> {
        self.existing_event.as_ref()
    }

    /// Set the start time. On single-day drafts the end time moves along so
    /// the duration stays the same.
    pub fn on_start_time_selected(&mut self, value: impl Into<String>) {
        let old_start = std::mem::replace(&mut self.start_time, value.into());
        if self.start_date == self.end_date {
            self.adjust_end_time(&old_start);
        }
    }

    fn adjust_end_time(&mut self, old_start: &str) {
        let (Some(old_start), Some(start), Some(end)) = (
            parse_time(old_start),
            parse_time(&self.start_time),
            parse_time(&self.end_time),
        ) else {
            return;
        };
        let duration = (end - old_start).num_minutes().unsigned_abs() as u32;
        let total = start.hour() * 60 + start.minute() + duration;
        let hours = (total / 60).min(23);
        if let Some(new_end) = NaiveTime::from_hms_opt(hours, total % 60, 0) {
            self.end_time = time_string(new_end, self.ctx.user.am_pm);
        }
    }

    pub fn on_end_time_selected(&mut self, value: impl Into<String>) {
        self.end_time = value.into();
    }

    pub fn on_start_date_selected(&mut self, date: NaiveDate) {
        self.start_date = if date.year() < TIMESTAMP_ZERO_YEAR {
            let this_year = local_date(Utc::now(), self.ctx.zone).year();
            date.with_year(this_year)
                .or_else(|| (date - Duration::days(1)).with_year(this_year))
                .unwrap_or(date)
        } else {
            date
        };
    }

    pub fn on_end_date_selected(&mut self, date: NaiveDate) {
        self.end_date = date;
    }

    /// Turn repetition off (`None`) or change its frequency, keeping interval
    /// and end of an existing rule.
    pub fn on_repeat_period_selected(&mut self, period: Option<RepeatPeriod>) {
        self.repeat = period.map(|frequency| match self.repeat {
            Some(draft) => RepeatDraft { frequency, ..draft },
            None => RepeatDraft {
                frequency,
                interval: 1,
                end: RepeatEnd::Never,
            },
        });
    }

    pub fn on_repeat_interval_changed(&mut self, interval: u32) {
        if let Some(repeat) = &mut self.repeat {
            repeat.interval = interval;
        }
    }

    pub fn on_repeat_end_type_changed(&mut self, end_type: EndType) {
        let today = local_date(Utc::now(), self.ctx.zone);
        if let Some(repeat) = &mut self.repeat {
            repeat.end = match end_type {
                EndType::Never => RepeatEnd::Never,
                EndType::Count => RepeatEnd::Count(1),
                EndType::UntilDate => RepeatEnd::UntilDate(today),
            };
        }
    }

    pub fn on_end_occurrences_selected(&mut self, count: u32) {
        if let Some(RepeatDraft {
            end: end @ RepeatEnd::Count(_),
            ..
        }) = &mut self.repeat
        {
            *end = RepeatEnd::Count(count);
        }
    }

    pub fn on_repeat_end_date_selected(&mut self, date: NaiveDate) {
        if let Some(RepeatDraft {
            end: end @ RepeatEnd::UntilDate(_),
            ..
        }) = &mut self.repeat
        {
            *end = RepeatEnd::UntilDate(date);
        }
    }

    pub fn add_attendee(&mut self, address: &str) {
        if !self.attendees.iter().any(|a| a.address.address.eq_ignore_ascii_case(address)) {
            self.attendees.push(Attendee::new(address));
        }
    }

    pub fn remove_attendee(&mut self, address: &str) {
        self.attendees
            .retain(|a| !a.address.address.eq_ignore_ascii_case(address));
    }

    pub fn add_alarm(&mut self, trigger: AlarmInterval) {
        let identifier = generate_event_element_id(Utc::now().timestamp_millis());
        let alarm = AlarmInfo::new(identifier, trigger);
        self.alarms = self.alarms.iter().cloned().chain(std::iter::once(alarm)).collect();
    }

    /// Replace the trigger of the alarm `identifier`, or remove the alarm when
    /// `trigger` is `None`. Unknown identifiers leave the alarms untouched.
    pub fn change_alarm(&mut self, identifier: &str, trigger: Option<AlarmInterval>) {
        let Some(index) = self.alarms.iter().position(|a| a.alarm_identifier == identifier) else {
            return;
        };
        let mut alarms = self.alarms.to_vec();
        match trigger {
            Some(trigger) => alarms[index].trigger = trigger,
            None => {
                alarms.remove(index);
            }
        }
        self.alarms = Arc::from(alarms);
    }

    pub fn select_going(&mut self, going: AttendeeStatus) {
        if self.can_modify_own_attendance {
            self.going = going;
        }
    }

    /// Compute what committing the draft at `now` would store.
    pub fn prepare_commit(&self, now: DateTime<Utc>) -> Result<CommitPlan, ValidationError> {
        let zone = self.ctx.zone;
        let (start, end) = if self.all_day {
            (
                self.start_date.and_time(NaiveTime::MIN).and_utc(),
                (self.end_date + Duration::days(1)).and_time(NaiveTime::MIN).and_utc(),
            )
        } else {
            let start_time = parse_time(&self.start_time).ok_or(ValidationError::InvalidTimeFormat)?;
            let end_time = parse_time(&self.end_time).ok_or(ValidationError::InvalidTimeFormat)?;
            (
                local_to_utc(zone, self.start_date.and_time(start_time)),
                local_to_utc(zone, self.end_date.and_time(end_time)),
            )
        };
        if end <= start {
            return Err(ValidationError::EndBeforeStart);
        }

        let calendar = self.selected_calendar();
        let mut event = self
            .existing_event
            .clone()
            .unwrap_or_else(|| CalendarEvent::new(start, end));
        event.start_time = start;
        event.end_time = end;
        event.summary = self.summary.clone();
        event.description = self.note.clone();
        event.location = self.location.clone();
        event.owner_group = Some(calendar.group_root.id.clone());
        if event.uid.is_none() {
            event.uid = Some(generate_uid());
        }
        event.repeat_rule = match &self.repeat {
            Some(draft) => Some(self.repeat_rule_from_draft(draft, &event)?),
            None => None,
        };
        event.organizer = self.organizer.clone();
        event.attendees = self.attendees.clone();
        if !self.is_own_event(&event) && self.going != AttendeeStatus::NeedsAction {
            if let Some(own) = event
                .attendees
                .iter_mut()
                .find(|a| self.ctx.user.owns_address(&a.address.address))
            {
                own.status = self.going;
            }
        }
        if let Some(existing) = &self.existing_event {
            event.sequence = existing.sequence + 1;
        }

        let kind = match &self.existing_event {
            Some(existing)
                if existing.owner_group == event.owner_group
                    && existing.start_time == event.start_time
                    && existing.repeat_rule == event.repeat_rule =>
            {
                CommitKind::Update {
                    previous: existing.clone(),
                }
            }
            existing => {
                assign_event_id(&mut event, zone, &calendar.group_root, now);
                // Events from files are only templates, there is nothing to replace.
                let previous = existing.as_ref().filter(|e| e.owner_group.is_some()).cloned();
                CommitKind::Create { previous }
            }
        };

        Ok(CommitPlan {
            event,
            alarms: self.alarms.to_vec(),
            kind,
        })
    }

    fn repeat_rule_from_draft(
        &self,
        draft: &RepeatDraft,
        event: &CalendarEvent,
    ) -> Result<RepeatRule, ValidationError> {
        let zone = self.ctx.zone;
        let mut rule = RepeatRule::new(draft.frequency, draft.interval.max(1), zone.name());
        match draft.end {
            RepeatEnd::Never => {}
            RepeatEnd::Count(0) => {}
            RepeatEnd::Count(count) => {
                rule.end_type = EndType::Count;
                rule.end_value = Some(count.into());
            }
            RepeatEnd::UntilDate(last_day) => {
                let repeat_end = date_start_in_zone(last_day + Duration::days(1), zone);
                if repeat_end < event_start(event, zone) {
                    return Err(ValidationError::RepeatEndBeforeStart);
                }
                // Stored like the event times: UTC-encoded date for all-day
                // events, a plain instant otherwise.
                let stored = if self.all_day {
                    all_day_date_utc_from_zone(repeat_end, zone)
                } else {
                    repeat_end
                };
                rule.end_type = EndType::UntilDate;
                rule.end_value = Some(stored.timestamp_millis());
            }
        }
        Ok(rule)
    }

    /// Validate and persist the draft, then send invites, updates,
    /// cancellations or a response as needed.
    ///
    /// Returns whether the editor may close: `false` when the draft does not
    /// validate, in which case nothing was persisted.
    pub async fn on_ok_pressed(&self) -> CalendarResult<bool> {
        let plan = match self.prepare_commit(Utc::now()) {
            Ok(plan) => plan,
            Err(e) => {
                debug!(error = %e, "Event draft does not validate");
                return Ok(false);
            }
        };

        match &plan.kind {
            CommitKind::Create { previous } => {
                self.ctx
                    .worker
                    .create_calendar_event(&plan.event, &plan.alarms, previous.as_ref())
                    .await?
            }
            CommitKind::Update { previous } => {
                self.ctx
                    .worker
                    .update_calendar_event(&plan.event, &plan.alarms, previous)
                    .await?
            }
        }

        self.distribute(&plan).await;
        Ok(true)
    }

    async fn distribute(&self, plan: &CommitPlan) {
        let event = &plan.event;
        let distributor = &self.ctx.distributor;

        if self.is_own_event(event) {
            let previous: &[Attendee] = self
                .existing_event
                .as_ref()
                .map(|e| e.attendees.as_slice())
                .unwrap_or_default();
            let was_invited =
                |a: &Attendee| previous.iter().any(|p| p.address.address.eq_ignore_ascii_case(&a.address.address));
            let guests = event
                .attendees
                .iter()
                .filter(|a| !self.ctx.user.owns_address(&a.address.address));

            let (kept, added): (Vec<&Attendee>, Vec<&Attendee>) = guests.partition(|a| was_invited(*a));
            if !added.is_empty() {
                let recipients = addresses(&added);
                if let Err(e) = distributor.send_invite(event, &plan.alarms, &recipients).await {
                    warn!(error = %e, "Could not send invites");
                }
            }
            if !kept.is_empty() {
                let recipients = addresses(&kept);
                if let Err(e) = distributor.send_update(event, &recipients).await {
                    warn!(error = %e, "Could not send event update");
                }
            }
            if let Some(existing) = &self.existing_event {
                for removed in existing.attendees.iter().filter(|p| {
                    event.find_attendee(&p.address.address).is_none()
                        && !self.ctx.user.owns_address(&p.address.address)
                }) {
                    if let Err(e) = distributor.send_cancellation(existing, &removed.address).await {
                        warn!(error = %e, "Could not send cancellation");
                    }
                }
            }
        } else if let Some(own) = event
            .attendees
            .iter()
            .find(|a| self.ctx.user.owns_address(&a.address.address))
        {
            let previous_status = self
                .existing_event
                .as_ref()
                .and_then(|e| e.find_attendee(&own.address.address))
                .map(|a| a.status);
            if own.status != AttendeeStatus::NeedsAction && previous_status != Some(own.status) {
                if let Err(e) = distributor.send_response(event, &own.address, own.status).await {
                    warn!(error = %e, "Could not send response");
                }
            }
        }
    }

    /// Erase the existing event and cancel it for its guests.
    ///
    /// Repeating events are only erased once the caller confirmed it with the
    /// user. An event that is already gone counts as deleted. Returns whether
    /// the editor may close.
    pub async fn delete_event(&self, confirmed: bool) -> CalendarResult<bool> {
        let Some(event) = &self.existing_event else {
            return Ok(true);
        };
        if event.repeat_rule.is_some() && !confirmed {
            return Ok(false);
        }

        match self.ctx.worker.erase_event(event).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(event = ?event.id, "Event was already deleted");
                return Ok(true);
            }
            Err(e) => return Err(e),
        }
        info!(event = ?event.id, "Deleted event");

        if self.is_own_event(event) {
            for attendee in event
                .attendees
                .iter()
                .filter(|a| !self.ctx.user.owns_address(&a.address.address))
            {
                if let Err(e) = self.ctx.distributor.send_cancellation(event, &attendee.address).await {
                    warn!(error = %e, "Could not send cancellation");
                }
            }
        }
        Ok(true)
    }

    fn is_own_event(&self, event: &CalendarEvent) -> bool {
        event
            .organizer
            .as_deref()
            .is_some_and(|organizer| self.ctx.user.owns_address(organizer))
    }
}

fn addresses(attendees: &[&Attendee]) -> Vec<MailAddress> {
    attendees.iter().map(|a| a.address.clone()).collect()
}

/// Editor representation of a stored rule. Stored until dates are
/// exclusive, the editor shows the last included day.
fn repeat_draft_from_rule(rule: &RepeatRule, all_day: bool, zone: Tz) -> RepeatDraft {
    let end = match (rule.end_type, rule.occurrence_count(), rule.until()) {
        (EndType::Count, Some(count), _) => RepeatEnd::Count(u32::try_from(count).unwrap_or(u32::MAX)),
        (EndType::UntilDate, _, Some(until)) => {
            let local = if all_day {
                all_day_date_for_timezone(until, zone)
            } else {
                until
            };
            let shown = increment_by_repeat_period(local, RepeatPeriod::Daily, -1, zone);
            RepeatEnd::UntilDate(local_date(shown, zone))
        }
        _ => RepeatEnd::Never,
    };
    RepeatDraft {
        frequency: rule.frequency,
        interval: rule.interval,
        end,
    }
}

/// Give `event` a fresh id. Short events live in the calendar's short-event
/// list keyed by their start, long events in the long-event list keyed by
/// `now`.
pub fn assign_event_id(event: &mut CalendarEvent, zone: Tz, group_root: &CalendarGroupRoot, now: DateTime<Utc>) {
    let id = if is_long_event(event, zone) {
        IdTuple::new(
            group_root.long_events.clone(),
            generate_event_element_id(now.timestamp_millis()),
        )
    } else {
        IdTuple::new(
            group_root.short_events.clone(),
            generate_event_element_id(event.start_time.timestamp_millis()),
        )
    };
    event.id = Some(id);
}
