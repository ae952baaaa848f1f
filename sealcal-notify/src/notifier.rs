use notify_rust::Notification;
use sealcal_core::worker::{NotificationAction, Notifier};
use tracing::{debug, warn};

/// Shows reminders through the desktop notification service.
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn show_notification(&self, title: &str, body: &str, action: NotificationAction) {
        debug!(title, ?action, "Showing reminder");

        let result = Notification::new()
            .appname("sealcal")
            .summary(title)
            .body(body)
            .show();

        if let Err(e) = result {
            warn!(title, error = %e, "Could not show notification");
        }
    }
}
