//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CalendarError, CalendarResult};
use crate::event::{
    AlarmInfo, AttendeeStatus, CalendarEvent, CalendarEventUpdate, IdTuple, MailAddress,
    UserAlarmInfo,
};
use crate::worker::{
    CalendarWorker, EventWithAlarm, NotificationAction, Notifier, UpdateDistributor,
};

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCall {
    Create {
        event: CalendarEvent,
        alarms: Vec<AlarmInfo>,
        previous: Option<CalendarEvent>,
    },
    Update {
        event: CalendarEvent,
        alarms: Vec<AlarmInfo>,
    },
    Erase(IdTuple),
    EraseUpdate(IdTuple),
}

#[derive(Default)]
struct WorkerState {
    events: Vec<CalendarEvent>,
    user_alarms: Vec<UserAlarmInfo>,
    updates: Vec<CalendarEventUpdate>,
    files: HashMap<IdTuple, Vec<u8>>,
    calls: Vec<WorkerCall>,
}

#[derive(Default)]
pub struct FakeWorker {
    state: Mutex<WorkerState>,
}

impl FakeWorker {
    pub fn insert_event(&self, event: CalendarEvent) {
        self.state.lock().unwrap().events.push(event);
    }

    pub fn insert_user_alarm(&self, alarm: UserAlarmInfo) {
        self.state.lock().unwrap().user_alarms.push(alarm);
    }

    pub fn insert_update(&self, update: CalendarEventUpdate, content: &str) {
        let mut state = self.state.lock().unwrap();
        state.files.insert(update.file.clone(), content.as_bytes().to_vec());
        state.updates.push(update);
    }

    pub fn calls(&self) -> Vec<WorkerCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn events(&self) -> Vec<CalendarEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn pending_updates(&self) -> usize {
        self.state.lock().unwrap().updates.len()
    }
}

#[async_trait]
impl CalendarWorker for FakeWorker {
    async fn create_calendar_event(
        &self,
        event: &CalendarEvent,
        alarms: &[AlarmInfo],
        previous: Option<&CalendarEvent>,
    ) -> CalendarResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(prev) = previous {
            state.events.retain(|e| e.id != prev.id);
        }
        state.events.push(event.clone());
        state.calls.push(WorkerCall::Create {
            event: event.clone(),
            alarms: alarms.to_vec(),
            previous: previous.cloned(),
        });
        Ok(())
    }

    async fn update_calendar_event(
        &self,
        event: &CalendarEvent,
        alarms: &[AlarmInfo],
        _previous: &CalendarEvent,
    ) -> CalendarResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.events.iter_mut().find(|e| e.id == event.id) {
            Some(stored) => *stored = event.clone(),
            None => return Err(CalendarError::NotFound(format!("{:?}", event.id))),
        }
        state.calls.push(WorkerCall::Update {
            event: event.clone(),
            alarms: alarms.to_vec(),
        });
        Ok(())
    }

    async fn erase_event(&self, event: &CalendarEvent) -> CalendarResult<()> {
        let mut state = self.state.lock().unwrap();
        let id = event
            .id
            .clone()
            .ok_or_else(|| CalendarError::NotFound("event without id".into()))?;
        let before = state.events.len();
        state.events.retain(|e| e.id.as_ref() != Some(&id));
        if state.events.len() == before {
            return Err(CalendarError::NotFound(id.element_id));
        }
        state.calls.push(WorkerCall::Erase(id));
        Ok(())
    }

    async fn erase_event_update(&self, update: &CalendarEventUpdate) -> CalendarResult<()> {
        let mut state = self.state.lock().unwrap();
        state.updates.retain(|u| u.id != update.id);
        state.calls.push(WorkerCall::EraseUpdate(update.id.clone()));
        Ok(())
    }

    async fn event_by_uid(&self, uid: &str) -> CalendarResult<Option<CalendarEvent>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .find(|e| e.uid.as_deref() == Some(uid))
            .cloned())
    }

    async fn load_event(&self, id: &IdTuple) -> CalendarResult<CalendarEvent> {
        let state = self.state.lock().unwrap();
        state
            .events
            .iter()
            .find(|e| e.id.as_ref() == Some(id))
            .cloned()
            .ok_or_else(|| CalendarError::NotFound(id.element_id.clone()))
    }

    async fn load_user_alarm_info(&self, id: &IdTuple) -> CalendarResult<UserAlarmInfo> {
        let state = self.state.lock().unwrap();
        state
            .user_alarms
            .iter()
            .find(|a| &a.id == id)
            .cloned()
            .ok_or_else(|| CalendarError::NotFound(id.element_id.clone()))
    }

    async fn load_event_update(&self, id: &IdTuple) -> CalendarResult<CalendarEventUpdate> {
        let state = self.state.lock().unwrap();
        state
            .updates
            .iter()
            .find(|u| &u.id == id)
            .cloned()
            .ok_or_else(|| CalendarError::NotFound(id.element_id.clone()))
    }

    async fn load_alarm_events(&self) -> CalendarResult<Vec<EventWithAlarm>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .user_alarms
            .iter()
            .filter_map(|alarm| {
                let event_id = alarm.alarm_info.calendar_ref.as_ref()?;
                let event = state.events.iter().find(|e| e.id.as_ref() == Some(event_id))?;
                Some(EventWithAlarm {
                    event: event.clone(),
                    user_alarm_info: alarm.clone(),
                })
            })
            .collect())
    }

    async fn load_event_updates(&self) -> CalendarResult<Vec<CalendarEventUpdate>> {
        Ok(self.state.lock().unwrap().updates.clone())
    }

    async fn download_file_content(&self, file: &IdTuple) -> CalendarResult<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(file)
            .cloned()
            .ok_or_else(|| CalendarError::NotFound(file.element_id.clone()))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn shown(&self) -> Vec<(String, String)> {
        self.shown.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn show_notification(&self, title: &str, body: &str, _action: NotificationAction) {
        self.shown
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Invite(Vec<String>),
    Update(Vec<String>),
    Cancellation(String),
    Response(String, AttendeeStatus),
}

#[derive(Default)]
pub struct RecordingDistributor {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingDistributor {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

fn addresses(recipients: &[MailAddress]) -> Vec<String> {
    recipients.iter().map(|r| r.address.clone()).collect()
}

#[async_trait]
impl UpdateDistributor for RecordingDistributor {
    async fn send_invite(
        &self,
        _event: &CalendarEvent,
        _alarms: &[AlarmInfo],
        recipients: &[MailAddress],
    ) -> CalendarResult<()> {
        self.sent.lock().unwrap().push(Sent::Invite(addresses(recipients)));
        Ok(())
    }

    async fn send_update(&self, _event: &CalendarEvent, recipients: &[MailAddress]) -> CalendarResult<()> {
        self.sent.lock().unwrap().push(Sent::Update(addresses(recipients)));
        Ok(())
    }

    async fn send_cancellation(&self, _event: &CalendarEvent, recipient: &MailAddress) -> CalendarResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Cancellation(recipient.address.clone()));
        Ok(())
    }

    async fn send_response(
        &self,
        _event: &CalendarEvent,
        sender: &MailAddress,
        status: AttendeeStatus,
    ) -> CalendarResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Response(sender.address.clone(), status));
        Ok(())
    }
}
