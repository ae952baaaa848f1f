//! The calendar context object.
//!
//! One `CalendarModel` is built per session. It owns the alarm scheduler and
//! the invite reconciler and routes entity updates to them.

use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{info, warn};

use crate::alarm::AlarmScheduler;
use crate::config::SealcalConfig;
use crate::error::CalendarResult;
use crate::invite::InviteReplyReconciler;
use crate::worker::{CalendarWorker, EntityType, EntityUpdate, Notifier, OperationType};

/// Facts about the running client that decide whether alarms are scheduled
/// locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientEnvironment {
    /// Running inside the mobile app, which schedules alarms natively.
    pub app_host: bool,
    /// Signed in as a full (not external) user.
    pub internal_user_logged_in: bool,
    pub calendar_disabled: bool,
    pub notifications_supported: bool,
}

impl ClientEnvironment {
    pub fn from_config(
        config: &SealcalConfig,
        internal_user_logged_in: bool,
        notifications_supported: bool,
    ) -> Self {
        ClientEnvironment {
            app_host: config.app_host,
            internal_user_logged_in,
            calendar_disabled: config.calendar_disabled,
            notifications_supported: notifications_supported && config.local_alarms,
        }
    }

    pub fn local_alarms_enabled(&self) -> bool {
        !self.app_host
            && self.internal_user_logged_in
            && !self.calendar_disabled
            && self.notifications_supported
    }
}

pub struct CalendarModel {
    worker: Arc<dyn CalendarWorker>,
    scheduler: Arc<AlarmScheduler>,
    reconciler: InviteReplyReconciler,
    environment: ClientEnvironment,
}

impl CalendarModel {
    pub fn new(
        worker: Arc<dyn CalendarWorker>,
        notifier: Arc<dyn Notifier>,
        zone: Tz,
        environment: ClientEnvironment,
    ) -> Self {
        CalendarModel {
            scheduler: Arc::new(AlarmScheduler::new(Arc::clone(&worker), notifier, zone)),
            reconciler: InviteReplyReconciler::new(Arc::clone(&worker), zone),
            worker,
            environment,
        }
    }

    pub fn scheduler(&self) -> &Arc<AlarmScheduler> {
        &self.scheduler
    }

    pub fn reconciler(&self) -> &InviteReplyReconciler {
        &self.reconciler
    }

    pub fn environment(&self) -> ClientEnvironment {
        self.environment
    }

    /// Replace the environment, e.g. after login.
    pub fn set_environment(&mut self, environment: ClientEnvironment) {
        self.environment = environment;
    }

    /// Schedule local alarms, then process pending invites and replies.
    pub async fn init(&self) -> CalendarResult<()> {
        self.schedule_alarms_locally().await?;
        self.reconciler.process_calendar_replies().await
    }

    pub async fn schedule_alarms_locally(&self) -> CalendarResult<()> {
        if self.environment.local_alarms_enabled() {
            self.scheduler.schedule_alarms_locally().await
        } else {
            info!(environment = ?self.environment, "Local alarms are disabled");
            Ok(())
        }
    }

    /// Route a batch from the update channel.
    pub async fn entity_events_received(&self, updates: &[EntityUpdate]) {
        if self.environment.local_alarms_enabled() {
            self.scheduler.entity_events_received(updates);
        }

        for update in updates {
            if update.entity != EntityType::CalendarEventUpdate || update.operation != OperationType::Create {
                continue;
            }
            let id = update.id();
            match self.worker.load_event_update(&id).await {
                Ok(event_update) => self.reconciler.process_calendar_update(&event_update).await,
                Err(e) if e.is_not_found() => {
                    info!(update = %id.element_id, "Calendar update is already gone");
                }
                Err(e) => warn!(update = %id.element_id, error = %e, "Could not load calendar update"),
            }
        }
    }

    /// Tear down on logout.
    pub fn logout(&self) {
        self.scheduler.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{
        AlarmInfo, AlarmInterval, Attendee, AttendeeStatus, CalendarEvent, CalendarEventUpdate,
        IdTuple, UserAlarmInfo,
    };
    use crate::ics::{CalendarMethod, make_invitation_file};
    use crate::test_support::{FakeWorker, RecordingNotifier};
    use chrono::{Duration, Utc};

    fn enabled() -> ClientEnvironment {
        ClientEnvironment {
            app_host: false,
            internal_user_logged_in: true,
            calendar_disabled: false,
            notifications_supported: true,
        }
    }

    fn model(worker: &Arc<FakeWorker>, environment: ClientEnvironment) -> CalendarModel {
        CalendarModel::new(
            worker.clone(),
            Arc::new(RecordingNotifier::default()),
            chrono_tz::UTC,
            environment,
        )
    }

    fn event_with_alarm(worker: &FakeWorker) {
        let start = Utc::now() + Duration::days(2);
        let mut event = CalendarEvent::new(start, start + Duration::hours(1));
        event.id = Some(IdTuple::new("short", "event-1"));
        worker.insert_event(event);
        let mut alarm_info = AlarmInfo::new("a1", AlarmInterval::OneHour);
        alarm_info.calendar_ref = Some(IdTuple::new("short", "event-1"));
        worker.insert_user_alarm(UserAlarmInfo {
            id: IdTuple::new("alarms", "alarm-1"),
            alarm_info,
        });
    }

    #[test]
    fn enablement_gate() {
        assert!(enabled().local_alarms_enabled());
        assert!(!ClientEnvironment { app_host: true, ..enabled() }.local_alarms_enabled());
        assert!(!ClientEnvironment { internal_user_logged_in: false, ..enabled() }.local_alarms_enabled());
        assert!(!ClientEnvironment { calendar_disabled: true, ..enabled() }.local_alarms_enabled());
        assert!(!ClientEnvironment { notifications_supported: false, ..enabled() }.local_alarms_enabled());
    }

    #[test]
    fn config_can_turn_alarms_off() {
        let config = SealcalConfig {
            local_alarms: false,
            ..SealcalConfig::default()
        };
        assert!(!ClientEnvironment::from_config(&config, true, true).local_alarms_enabled());
        assert!(ClientEnvironment::from_config(&SealcalConfig::default(), true, true).local_alarms_enabled());
    }

    #[test]
    fn external_user_from_config_gets_no_local_alarms() {
        let config = SealcalConfig::default();
        let environment = ClientEnvironment::from_config(&config, false, true);
        assert!(!environment.internal_user_logged_in);
        assert!(!environment.local_alarms_enabled());
    }

    #[tokio::test]
    async fn init_schedules_alarms_and_consumes_updates() {
        let worker = Arc::new(FakeWorker::default());
        event_with_alarm(&worker);
        worker.insert_update(
            CalendarEventUpdate {
                id: IdTuple::new("updates", "u1"),
                file: IdTuple::new("files", "f1"),
                sender: "someone@example.com".to_string(),
            },
            "garbage",
        );
        let model = model(&worker, enabled());

        model.init().await.unwrap();

        assert_eq!(model.scheduler().scheduled_identifiers(), vec!["alarm-1".to_string()]);
        assert_eq!(worker.pending_updates(), 0);
        model.logout();
        assert!(model.scheduler().scheduled_identifiers().is_empty());
    }

    #[tokio::test]
    async fn disabled_environment_schedules_nothing() {
        let worker = Arc::new(FakeWorker::default());
        event_with_alarm(&worker);
        let model = model(&worker, ClientEnvironment { app_host: true, ..enabled() });

        model.init().await.unwrap();

        assert!(model.scheduler().scheduled_identifiers().is_empty());
    }

    #[tokio::test]
    async fn created_update_record_is_reconciled() {
        let worker = Arc::new(FakeWorker::default());
        let start = Utc::now() + Duration::days(2);
        let mut event = CalendarEvent::new(start, start + Duration::hours(1));
        event.id = Some(IdTuple::new("short", "event-1"));
        event.uid = Some("meeting@sealcal".to_string());
        event.attendees = vec![Attendee::new("guest@example.com")];
        worker.insert_event(event.clone());

        let mut reply = event.clone();
        reply.attendees[0].status = AttendeeStatus::Declined;
        let update = CalendarEventUpdate {
            id: IdTuple::new("updates", "u1"),
            file: IdTuple::new("files", "f1"),
            sender: "guest@example.com".to_string(),
        };
        let content = make_invitation_file(&reply, &[], CalendarMethod::Reply, Utc::now()).unwrap();
        worker.insert_update(update, &content);

        let model = model(&worker, enabled());
        model
            .entity_events_received(&[
                EntityUpdate {
                    operation: OperationType::Create,
                    entity: EntityType::CalendarEventUpdate,
                    instance_list_id: "updates".to_string(),
                    instance_id: "u1".to_string(),
                },
                EntityUpdate {
                    operation: OperationType::Create,
                    entity: EntityType::CalendarEventUpdate,
                    instance_list_id: "updates".to_string(),
                    instance_id: "missing".to_string(),
                },
            ])
            .await;

        assert_eq!(worker.events()[0].attendees[0].status, AttendeeStatus::Declined);
        assert_eq!(worker.pending_updates(), 0);
    }
}
