//! Reconciliation of inbound invites and replies with stored events.
//!
//! Every `CalendarEventUpdate` is consumed exactly once: whatever happens while
//! applying it, the record is erased afterwards and never retried.

use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{info, warn};

use crate::error::{CalendarError, CalendarResult};
use crate::event::{CalendarEvent, CalendarEventUpdate};
use crate::ics::{CalendarMethod, parse_calendar_file};
use crate::worker::CalendarWorker;

pub struct InviteReplyReconciler {
    worker: Arc<dyn CalendarWorker>,
    zone: Tz,
}

impl InviteReplyReconciler {
    /// `zone` is used for floating times in inbound files.
    pub fn new(worker: Arc<dyn CalendarWorker>, zone: Tz) -> Self {
        InviteReplyReconciler { worker, zone }
    }

    /// Process every pending update record in the order the worker lists them.
    pub async fn process_calendar_replies(&self) -> CalendarResult<()> {
        let updates = self.worker.load_event_updates().await?;
        for update in &updates {
            self.process_calendar_update(update).await;
        }
        Ok(())
    }

    /// Apply one update record, then erase it. Failures are logged only.
    pub async fn process_calendar_update(&self, update: &CalendarEventUpdate) {
        if let Err(e) = self.apply(update).await {
            warn!(update = ?update.id, sender = %update.sender, "Could not process calendar update: {}", e);
        }
        if let Err(e) = self.worker.erase_event_update(update).await {
            warn!(update = ?update.id, "Could not erase calendar update: {}", e);
        }
    }

    async fn apply(&self, update: &CalendarEventUpdate) -> CalendarResult<()> {
        let bytes = self.worker.download_file_content(&update.file).await?;
        let content = String::from_utf8(bytes)
            .map_err(|e| CalendarError::IcsParse(format!("calendar file is not UTF-8: {e}")))?;
        let parsed = parse_calendar_file(&content, self.zone)?;

        let Some(incoming) = parsed.contents.into_iter().next().map(|c| c.event) else {
            return Err(CalendarError::IcsParse("calendar file has no events".to_string()));
        };

        match parsed.method {
            CalendarMethod::Reply => self.apply_reply(&incoming).await,
            CalendarMethod::Request => self.apply_request(&incoming).await,
            other => {
                info!(method = other.as_ics_str(), "Ignoring calendar update");
                Ok(())
            }
        }
    }

    /// Copy the replying attendee's status onto the stored event.
    ///
    /// The replying attendee is taken to be the first ATTENDEE of the reply.
    /// Nothing ties it to the mail's sender.
    async fn apply_reply(&self, incoming: &CalendarEvent) -> CalendarResult<()> {
        let Some(existing) = self.stored_event(incoming).await? else {
            info!(uid = ?incoming.uid, "Reply for unknown event");
            return Ok(());
        };
        let Some(replying) = incoming.attendees.first() else {
            info!(uid = ?incoming.uid, "Reply without attendee");
            return Ok(());
        };

        let mut updated = existing.clone();
        let Some(attendee) = updated
            .attendees
            .iter_mut()
            .find(|a| a.address.address.eq_ignore_ascii_case(&replying.address.address))
        else {
            info!(uid = ?incoming.uid, attendee = %replying.address.address, "Reply from someone who is not a guest");
            return Ok(());
        };
        attendee.status = replying.status;

        info!(uid = ?incoming.uid, attendee = %replying.address.address, status = replying.status.as_ics_str(), "Applying reply");
        self.worker.update_calendar_event(&updated, &[], &existing).await
    }

    /// Take over guests, title and sequence of an updated invitation.
    /// Invitations for events that are not stored yet are left alone.
    async fn apply_request(&self, incoming: &CalendarEvent) -> CalendarResult<()> {
        let Some(existing) = self.stored_event(incoming).await? else {
            info!(uid = ?incoming.uid, "Invitation for an event that is not stored, skipping");
            return Ok(());
        };

        let mut updated = existing.clone();
        updated.attendees = incoming.attendees.clone();
        updated.summary = incoming.summary.clone();
        updated.sequence = incoming.sequence;

        info!(uid = ?incoming.uid, sequence = incoming.sequence, "Applying invitation update");
        self.worker.update_calendar_event(&updated, &[], &existing).await
    }

    async fn stored_event(&self, incoming: &CalendarEvent) -> CalendarResult<Option<CalendarEvent>> {
        match &incoming.uid {
            Some(uid) => self.worker.event_by_uid(uid).await,
            None => Ok(None),
        }
    }
}
