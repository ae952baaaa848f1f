//! Calendar entity types.
//!
//! These mirror the records the worker persists. The core never stores them
//! itself; it reads them, computes on them and hands modified copies back to
//! the worker.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Element ids are shifted by up to this many milliseconds in either direction
/// so that events created at the same moment do not collide.
const DAYS_SHIFTED_MS: i64 = 15 * 24 * 60 * 60 * 1000;

/// Identity of a list element: the list it lives in plus its id in that list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTuple {
    pub list_id: String,
    pub element_id: String,
}

impl IdTuple {
    pub fn new(list_id: impl Into<String>, element_id: impl Into<String>) -> Self {
        IdTuple {
            list_id: list_id.into(),
            element_id: element_id.into(),
        }
    }
}

/// A calendar event as stored by the worker.
///
/// All-day events are encoded as UTC midnight pairs spanning whole days;
/// timed events carry true instants. `end_time` is always after `start_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    /// None for events that were never persisted (e.g. parsed from a file).
    pub id: Option<IdTuple>,
    /// Calendar group owning the event. Not set for events from files.
    pub owner_group: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub summary: String,
    pub description: String,
    pub location: String,
    pub organizer: Option<String>,
    pub attendees: Vec<Attendee>,
    pub repeat_rule: Option<RepeatRule>,
    pub sequence: u64,
    /// Local copy of an event organized by someone else.
    pub is_copy: bool,
    pub uid: Option<String>,
    /// UserAlarmInfo entries linked to this event.
    pub alarm_infos: Vec<IdTuple>,
}

impl CalendarEvent {
    /// An unsaved event with the given time span and everything else empty.
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        CalendarEvent {
            id: None,
            owner_group: None,
            start_time,
            end_time,
            summary: String::new(),
            description: String::new(),
            location: String::new(),
            organizer: None,
            attendees: Vec::new(),
            repeat_rule: None,
            sequence: 0,
            is_copy: false,
            uid: None,
            alarm_infos: Vec::new(),
        }
    }

    pub fn element_id(&self) -> Option<&str> {
        self.id.as_ref().map(|id| id.element_id.as_str())
    }

    pub fn find_attendee(&self, address: &str) -> Option<&Attendee> {
        self.attendees
            .iter()
            .find(|a| a.address.address.eq_ignore_ascii_case(address))
    }
}

/// Identity comparison used when bucketing events into days.
///
/// Persisted events compare by id. Occurrences of a recurring event share the
/// id of their master, so the start time is part of the identity too.
pub fn is_same_event(left: &CalendarEvent, right: &CalendarEvent) -> bool {
    match (&left.id, &right.id) {
        (Some(l), Some(r)) => l == r && left.start_time == right.start_time,
        (None, None) => left.uid == right.uid && left.start_time == right.start_time,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepeatPeriod {
    Daily,
    Weekly,
    Monthly,
    Annually,
}

impl RepeatPeriod {
    pub fn as_ics_str(&self) -> &'static str {
        match self {
            RepeatPeriod::Daily => "DAILY",
            RepeatPeriod::Weekly => "WEEKLY",
            RepeatPeriod::Monthly => "MONTHLY",
            RepeatPeriod::Annually => "YEARLY",
        }
    }

    pub fn from_ics_str(s: &str) -> Option<Self> {
        match s {
            "DAILY" => Some(RepeatPeriod::Daily),
            "WEEKLY" => Some(RepeatPeriod::Weekly),
            "MONTHLY" => Some(RepeatPeriod::Monthly),
            "YEARLY" => Some(RepeatPeriod::Annually),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EndType {
    #[default]
    Never,
    Count,
    UntilDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatRule {
    pub frequency: RepeatPeriod,
    /// Step between occurrences in units of `frequency`. Always >= 1.
    pub interval: u32,
    pub end_type: EndType,
    /// Occurrence count for `EndType::Count`, epoch millis for `EndType::UntilDate`.
    pub end_value: Option<i64>,
    /// IANA zone the recurrence is computed in.
    pub time_zone: String,
}

impl RepeatRule {
    pub fn new(frequency: RepeatPeriod, interval: u32, time_zone: impl Into<String>) -> Self {
        RepeatRule {
            frequency,
            interval: interval.max(1),
            end_type: EndType::Never,
            end_value: None,
            time_zone: time_zone.into(),
        }
    }

    /// Number of occurrences for a count-bounded rule. Negative counts mean none.
    pub fn occurrence_count(&self) -> Option<i64> {
        match self.end_type {
            EndType::Count => self.end_value.map(|n| n.max(0)),
            _ => None,
        }
    }

    pub fn until(&self) -> Option<DateTime<Utc>> {
        match self.end_type {
            EndType::UntilDate => self.end_value.and_then(DateTime::from_timestamp_millis),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailAddress {
    pub address: String,
    pub name: String,
}

impl MailAddress {
    pub fn new(address: impl Into<String>) -> Self {
        MailAddress {
            address: address.into(),
            name: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    pub address: MailAddress,
    pub status: AttendeeStatus,
}

impl Attendee {
    pub fn new(address: impl Into<String>) -> Self {
        Attendee {
            address: MailAddress::new(address),
            status: AttendeeStatus::NeedsAction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AttendeeStatus {
    #[default]
    NeedsAction,
    Accepted,
    Tentative,
    Declined,
}

impl AttendeeStatus {
    pub fn as_ics_str(&self) -> &'static str {
        match self {
            AttendeeStatus::NeedsAction => "NEEDS-ACTION",
            AttendeeStatus::Accepted => "ACCEPTED",
            AttendeeStatus::Tentative => "TENTATIVE",
            AttendeeStatus::Declined => "DECLINED",
        }
    }

    pub fn from_ics_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NEEDS-ACTION" => Some(AttendeeStatus::NeedsAction),
            "ACCEPTED" => Some(AttendeeStatus::Accepted),
            "TENTATIVE" => Some(AttendeeStatus::Tentative),
            "DECLINED" => Some(AttendeeStatus::Declined),
            _ => None,
        }
    }
}

/// How long before the event start an alarm fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlarmInterval {
    #[serde(rename = "5M")]
    FiveMinutes,
    #[serde(rename = "10M")]
    TenMinutes,
    #[serde(rename = "30M")]
    ThirtyMinutes,
    #[serde(rename = "1H")]
    OneHour,
    #[serde(rename = "1D")]
    OneDay,
    #[serde(rename = "2D")]
    TwoDays,
    #[serde(rename = "3D")]
    ThreeDays,
    #[serde(rename = "1W")]
    OneWeek,
}

impl AlarmInterval {
    pub const ALL: [AlarmInterval; 8] = [
        AlarmInterval::FiveMinutes,
        AlarmInterval::TenMinutes,
        AlarmInterval::ThirtyMinutes,
        AlarmInterval::OneHour,
        AlarmInterval::OneDay,
        AlarmInterval::TwoDays,
        AlarmInterval::ThreeDays,
        AlarmInterval::OneWeek,
    ];

    /// Offset as an absolute duration.
    pub fn duration(&self) -> Duration {
        match self {
            AlarmInterval::FiveMinutes => Duration::minutes(5),
            AlarmInterval::TenMinutes => Duration::minutes(10),
            AlarmInterval::ThirtyMinutes => Duration::minutes(30),
            AlarmInterval::OneHour => Duration::hours(1),
            AlarmInterval::OneDay => Duration::days(1),
            AlarmInterval::TwoDays => Duration::days(2),
            AlarmInterval::ThreeDays => Duration::days(3),
            AlarmInterval::OneWeek => Duration::weeks(1),
        }
    }

    /// The interval matching a VALARM offset exactly, if any.
    pub fn from_minutes(minutes: i64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|interval| interval.duration().num_minutes() == minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmInfo {
    /// Unique within the alarm set of one event.
    pub alarm_identifier: String,
    pub trigger: AlarmInterval,
    pub calendar_ref: Option<IdTuple>,
}

impl AlarmInfo {
    pub fn new(alarm_identifier: impl Into<String>, trigger: AlarmInterval) -> Self {
        AlarmInfo {
            alarm_identifier: alarm_identifier.into(),
            trigger,
            calendar_ref: None,
        }
    }
}

/// Links the current user to one alarm of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAlarmInfo {
    pub id: IdTuple,
    pub alarm_info: AlarmInfo,
}

/// Record pointing at an inbound calendar file (invite or reply) to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEventUpdate {
    pub id: IdTuple,
    pub file: IdTuple,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarGroupRoot {
    pub id: String,
    pub short_events: String,
    pub long_events: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    /// Account owning the group.
    pub user: String,
}

/// In-memory view of one calendar the user can see. Only used for
/// permission decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarInfo {
    pub group_root: CalendarGroupRoot,
    pub name: String,
    pub group: Group,
    /// True when the current user does not own the calendar.
    pub shared: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ShareCapability {
    Read,
    Write,
    Invite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMembership {
    pub group: String,
    pub capability: Option<ShareCapability>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub memberships: Vec<GroupMembership>,
    /// List holding this user's UserAlarmInfo entries.
    pub alarm_info_list: Option<String>,
}

/// Owners hold every capability; everyone else needs a membership granting at
/// least `capability`.
pub fn has_capability_on_group(user: &User, group: &Group, capability: ShareCapability) -> bool {
    if group.user == user.id {
        return true;
    }
    user.memberships
        .iter()
        .find(|m| m.group == group.id)
        .and_then(|m| m.capability)
        .is_some_and(|held| held >= capability)
}

/// Element id derived from a timestamp with a random shift.
pub fn generate_event_element_id(timestamp_millis: i64) -> String {
    let shift = rand::rng().random_range(-DAYS_SHIFTED_MS..=DAYS_SHIFTED_MS);
    create_event_element_id(timestamp_millis, shift)
}

/// Smallest element id an event starting at `timestamp_millis` can have.
pub fn event_element_min_id(timestamp_millis: i64) -> String {
    create_event_element_id(timestamp_millis, -DAYS_SHIFTED_MS)
}

/// Largest element id an event starting at `timestamp_millis` can have.
pub fn event_element_max_id(timestamp_millis: i64) -> String {
    create_event_element_id(timestamp_millis, DAYS_SHIFTED_MS)
}

fn create_event_element_id(timestamp_millis: i64, shift_millis: i64) -> String {
    URL_SAFE_NO_PAD.encode((timestamp_millis + shift_millis).to_string())
}

/// Stable cross-system identifier for a new event.
pub fn generate_uid() -> String {
    format!("{}@sealcal", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(owner: &str) -> Group {
        Group {
            id: "calendar-group".to_string(),
            user: owner.to_string(),
        }
    }

    fn user_with(capability: Option<ShareCapability>) -> User {
        User {
            id: "me".to_string(),
            memberships: vec![GroupMembership {
                group: "calendar-group".to_string(),
                capability,
            }],
            alarm_info_list: None,
        }
    }

    #[test]
    fn owner_has_every_capability() {
        let user = user_with(None);
        assert!(has_capability_on_group(&user, &group("me"), ShareCapability::Invite));
    }

    #[test]
    fn capability_is_ordered() {
        let user = user_with(Some(ShareCapability::Write));
        let g = group("someone-else");
        assert!(has_capability_on_group(&user, &g, ShareCapability::Read));
        assert!(has_capability_on_group(&user, &g, ShareCapability::Write));
        assert!(!has_capability_on_group(&user, &g, ShareCapability::Invite));
    }

    #[test]
    fn read_only_member_cannot_write() {
        let user = user_with(Some(ShareCapability::Read));
        assert!(!has_capability_on_group(&user, &group("someone-else"), ShareCapability::Write));
    }

    #[test]
    fn element_ids_stay_within_shift_window() {
        let ts = 1_590_000_000_000;
        let min = event_element_min_id(ts);
        let max = event_element_max_id(ts);
        for _ in 0..20 {
            let id = generate_event_element_id(ts);
            let decoded = URL_SAFE_NO_PAD.decode(&id).unwrap();
            let value: i64 = String::from_utf8(decoded).unwrap().parse().unwrap();
            assert!((ts - DAYS_SHIFTED_MS..=ts + DAYS_SHIFTED_MS).contains(&value));
        }
        assert_ne!(min, max);
    }

    #[test]
    fn alarm_interval_wire_codes() {
        assert_eq!(serde_json::to_string(&AlarmInterval::OneWeek).unwrap(), "\"1W\"");
        let parsed: AlarmInterval = serde_json::from_str("\"30M\"").unwrap();
        assert_eq!(parsed, AlarmInterval::ThirtyMinutes);
        assert_eq!(AlarmInterval::from_minutes(60), Some(AlarmInterval::OneHour));
        assert_eq!(AlarmInterval::from_minutes(7), None);
    }

    #[test]
    fn same_event_distinguishes_occurrences() {
        let start = DateTime::from_timestamp(1_600_000_000, 0).unwrap();
        let mut a = CalendarEvent::new(start, start + Duration::hours(1));
        a.id = Some(IdTuple::new("list", "el"));
        let mut b = a.clone();
        assert!(is_same_event(&a, &b));
        b.start_time = start + Duration::days(1);
        assert!(!is_same_event(&a, &b));
    }
}
