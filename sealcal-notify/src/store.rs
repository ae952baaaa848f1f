//! A calendar worker over a directory of .ics files.
//!
//! Layout:
//! - `<dir>/<id>.ics`: one event per file, its VALARMs are the user's alarms
//! - `<dir>/inbox/<id>.ics`: received invites and replies waiting to be applied

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use sealcal_core::ics::{CalendarMethod, ParsedEvent, make_invitation_file, parse_calendar_file};
use sealcal_core::worker::{CalendarWorker, EventWithAlarm};
use sealcal_core::{
    AlarmInfo, CalendarError, CalendarEvent, CalendarEventUpdate, CalendarResult, IdTuple,
    UserAlarmInfo, generate_event_element_id,
};
use tracing::{debug, warn};

pub const EVENT_LIST: &str = "events";
pub const ALARM_LIST: &str = "alarms";
pub const INBOX_LIST: &str = "inbox";

pub struct FileStore {
    root: PathBuf,
    zone: Tz,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, zone: Tz) -> Self {
        FileStore {
            root: root.into(),
            zone,
        }
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.root.join(INBOX_LIST)
    }

    fn event_path(&self, element_id: &str) -> PathBuf {
        self.root.join(format!("{element_id}.ics"))
    }

    fn inbox_path(&self, element_id: &str) -> PathBuf {
        self.inbox_dir().join(format!("{element_id}.ics"))
    }

    fn read_event(&self, path: &Path) -> CalendarResult<Option<ParsedEvent>> {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return Ok(None);
        };
        let content = std::fs::read_to_string(path).map_err(|e| io_error(e, path))?;
        let parsed = parse_calendar_file(&content, self.zone)?;
        Ok(parsed.contents.into_iter().next().map(|mut item| {
            item.event.id = Some(IdTuple::new(EVENT_LIST, stem));
            item.event.owner_group = Some(EVENT_LIST.to_string());
            item.event.alarm_infos = (0..item.alarms.len())
                .map(|i| IdTuple::new(ALARM_LIST, alarm_element_id(stem, i)))
                .collect();
            item
        }))
    }

    /// Every readable event file. Files that fail to parse are skipped.
    fn read_events(&self) -> CalendarResult<Vec<ParsedEvent>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "ics"))
            .collect();
        paths.sort();

        Ok(paths
            .iter()
            .filter_map(|path| match self.read_event(path) {
                Ok(item) => item,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable calendar file");
                    None
                }
            })
            .collect())
    }

    fn write_event(&self, event: &CalendarEvent, alarms: &[AlarmInfo]) -> CalendarResult<()> {
        let id = event
            .id
            .as_ref()
            .ok_or_else(|| CalendarError::Worker("event has no id".to_string()))?;
        let content = make_invitation_file(event, alarms, CalendarMethod::Publish, Utc::now())?;
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.event_path(&id.element_id), content)?;
        Ok(())
    }
}

fn alarm_element_id(event_element_id: &str, index: usize) -> String {
    format!("{event_element_id}-{index}")
}

fn io_error(e: std::io::Error, path: &Path) -> CalendarError {
    if e.kind() == ErrorKind::NotFound {
        CalendarError::NotFound(path.display().to_string())
    } else {
        CalendarError::Io(e)
    }
}

fn user_alarms(item: &ParsedEvent) -> Vec<UserAlarmInfo> {
    item.event
        .alarm_infos
        .iter()
        .zip(&item.alarms)
        .map(|(id, trigger)| {
            let mut alarm_info = AlarmInfo::new(id.element_id.clone(), *trigger);
            alarm_info.calendar_ref = item.event.id.clone();
            UserAlarmInfo {
                id: id.clone(),
                alarm_info,
            }
        })
        .collect()
}

#[async_trait]
impl CalendarWorker for FileStore {
    async fn create_calendar_event(
        &self,
        event: &CalendarEvent,
        alarms: &[AlarmInfo],
        previous: Option<&CalendarEvent>,
    ) -> CalendarResult<()> {
        let mut event = event.clone();
        if event.id.is_none() {
            let element_id = generate_event_element_id(event.start_time.timestamp_millis());
            event.id = Some(IdTuple::new(EVENT_LIST, element_id));
        }
        self.write_event(&event, alarms)?;

        if let Some(previous_id) = previous.and_then(|p| p.id.as_ref()) {
            if Some(previous_id) != event.id.as_ref() {
                let path = self.event_path(&previous_id.element_id);
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Alarms stay as stored: they belong to the user, not to the event
    /// update.
    async fn update_calendar_event(
        &self,
        event: &CalendarEvent,
        _alarms: &[AlarmInfo],
        _previous: &CalendarEvent,
    ) -> CalendarResult<()> {
        let id = event
            .id
            .as_ref()
            .ok_or_else(|| CalendarError::Worker("event has no id".to_string()))?;
        let stored = self
            .read_event(&self.event_path(&id.element_id))?
            .ok_or_else(|| CalendarError::NotFound(id.element_id.clone()))?;
        let alarms: Vec<AlarmInfo> = user_alarms(&stored).into_iter().map(|a| a.alarm_info).collect();
        self.write_event(event, &alarms)
    }

    async fn erase_event(&self, event: &CalendarEvent) -> CalendarResult<()> {
        let id = event
            .id
            .as_ref()
            .ok_or_else(|| CalendarError::NotFound("event without id".to_string()))?;
        let path = self.event_path(&id.element_id);
        std::fs::remove_file(&path).map_err(|e| io_error(e, &path))
    }

    async fn erase_event_update(&self, update: &CalendarEventUpdate) -> CalendarResult<()> {
        let path = self.inbox_path(&update.id.element_id);
        debug!(path = %path.display(), "Removing processed calendar update");
        std::fs::remove_file(&path).map_err(|e| io_error(e, &path))
    }

    async fn event_by_uid(&self, uid: &str) -> CalendarResult<Option<CalendarEvent>> {
        Ok(self
            .read_events()?
            .into_iter()
            .map(|item| item.event)
            .find(|event| event.uid.as_deref() == Some(uid)))
    }

    async fn load_event(&self, id: &IdTuple) -> CalendarResult<CalendarEvent> {
        self.read_event(&self.event_path(&id.element_id))?
            .map(|item| item.event)
            .ok_or_else(|| CalendarError::NotFound(id.element_id.clone()))
    }

    async fn load_user_alarm_info(&self, id: &IdTuple) -> CalendarResult<UserAlarmInfo> {
        let (event_element_id, _) = id
            .element_id
            .rsplit_once('-')
            .ok_or_else(|| CalendarError::NotFound(id.element_id.clone()))?;
        self.read_event(&self.event_path(event_element_id))?
            .and_then(|item| user_alarms(&item).into_iter().find(|a| &a.id == id))
            .ok_or_else(|| CalendarError::NotFound(id.element_id.clone()))
    }

    async fn load_event_update(&self, id: &IdTuple) -> CalendarResult<CalendarEventUpdate> {
        let path = self.inbox_path(&id.element_id);
        if !path.is_file() {
            return Err(CalendarError::NotFound(path.display().to_string()));
        }
        Ok(CalendarEventUpdate {
            id: id.clone(),
            file: IdTuple::new(INBOX_LIST, id.element_id.clone()),
            sender: String::new(),
        })
    }

    async fn load_alarm_events(&self) -> CalendarResult<Vec<EventWithAlarm>> {
        Ok(self
            .read_events()?
            .iter()
            .flat_map(|item| {
                user_alarms(item).into_iter().map(|user_alarm_info| EventWithAlarm {
                    event: item.event.clone(),
                    user_alarm_info,
                })
            })
            .collect())
    }

    async fn load_event_updates(&self) -> CalendarResult<Vec<CalendarEventUpdate>> {
        let entries = match std::fs::read_dir(self.inbox_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut stems: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "ics"))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        stems.sort();

        Ok(stems
            .into_iter()
            .map(|stem| CalendarEventUpdate {
                id: IdTuple::new(INBOX_LIST, stem.clone()),
                file: IdTuple::new(INBOX_LIST, stem),
                sender: String::new(),
            })
            .collect())
    }

    async fn download_file_content(&self, file: &IdTuple) -> CalendarResult<Vec<u8>> {
        let path = self.inbox_path(&file.element_id);
        std::fs::read(&path).map_err(|e| io_error(e, &path))
    }
}
