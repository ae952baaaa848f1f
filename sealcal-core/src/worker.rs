//! Seams to the collaborators the calendar core talks to.
//!
//! The worker does all network and crypto work; the core only sees entities.
//! Notifications and invite mails are presented/sent by the host application.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CalendarResult;
use crate::event::{
    AlarmInfo, AttendeeStatus, CalendarEvent, CalendarEventUpdate, IdTuple, MailAddress,
    UserAlarmInfo,
};

/// An event together with one of the current user's alarms for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventWithAlarm {
    pub event: CalendarEvent,
    pub user_alarm_info: UserAlarmInfo,
}

/// Persistence and transport of calendar entities.
///
/// Lookups that find nothing return `Ok(None)`; operations on entities that no
/// longer exist fail with `CalendarError::NotFound`.
#[async_trait]
pub trait CalendarWorker: Send + Sync {
    /// Create `event` with `alarms`, replacing `previous` if given.
    async fn create_calendar_event(
        &self,
        event: &CalendarEvent,
        alarms: &[AlarmInfo],
        previous: Option<&CalendarEvent>,
    ) -> CalendarResult<()>;

    /// Update `event` in place.
    async fn update_calendar_event(
        &self,
        event: &CalendarEvent,
        alarms: &[AlarmInfo],
        previous: &CalendarEvent,
    ) -> CalendarResult<()>;

    async fn erase_event(&self, event: &CalendarEvent) -> CalendarResult<()>;

    async fn erase_event_update(&self, update: &CalendarEventUpdate) -> CalendarResult<()>;

    async fn event_by_uid(&self, uid: &str) -> CalendarResult<Option<CalendarEvent>>;

    async fn load_event(&self, id: &IdTuple) -> CalendarResult<CalendarEvent>;

    async fn load_user_alarm_info(&self, id: &IdTuple) -> CalendarResult<UserAlarmInfo>;

    async fn load_event_update(&self, id: &IdTuple) -> CalendarResult<CalendarEventUpdate>;

    /// Every event the current user has alarms for.
    async fn load_alarm_events(&self) -> CalendarResult<Vec<EventWithAlarm>>;

    /// Pending inbound calendar files.
    async fn load_event_updates(&self) -> CalendarResult<Vec<CalendarEventUpdate>>;

    async fn download_file_content(&self, file: &IdTuple) -> CalendarResult<Vec<u8>>;
}

/// What should happen when the user activates a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    OpenAgenda,
}

pub trait Notifier: Send + Sync {
    fn show_notification(&self, title: &str, body: &str, action: NotificationAction);
}

/// Sends invitation mails. Only called after the event was persisted.
#[async_trait]
pub trait UpdateDistributor: Send + Sync {
    async fn send_invite(
        &self,
        event: &CalendarEvent,
        alarms: &[AlarmInfo],
        recipients: &[MailAddress],
    ) -> CalendarResult<()>;

    async fn send_update(&self, event: &CalendarEvent, recipients: &[MailAddress]) -> CalendarResult<()>;

    async fn send_cancellation(&self, event: &CalendarEvent, recipient: &MailAddress) -> CalendarResult<()>;

    async fn send_response(
        &self,
        event: &CalendarEvent,
        sender: &MailAddress,
        status: AttendeeStatus,
    ) -> CalendarResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    CalendarEvent,
    UserAlarmInfo,
    CalendarEventUpdate,
    Other,
}

/// One entry of an entity-change batch from the update channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityUpdate {
    pub operation: OperationType,
    pub entity: EntityType,
    pub instance_list_id: String,
    pub instance_id: String,
}

impl EntityUpdate {
    pub fn id(&self) -> IdTuple {
        IdTuple::new(self.instance_list_id.clone(), self.instance_id.clone())
    }
}
