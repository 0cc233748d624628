//! Desktop notifications via notify-rust (D-Bus).

use notify_rust::Notification;
use tracing::{debug, warn};

use crate::events::{EventHub, SessionEvent};

#[derive(Debug, Clone)]
pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Forward prominent notices from `events` to the desktop.
    pub fn attach(self, events: &EventHub) {
        if !self.enabled {
            return;
        }
        events.on_event(move |event| {
            if let SessionEvent::Notice(notice) = event {
                if notice.is_prominent() {
                    self.notify("Board Narrator", &notice.to_string());
                }
            }
        });
    }

    pub fn notify(&self, summary: &str, body: &str) {
        if !self.enabled {
            return;
        }

        debug!("Notification: {summary}: {body}");

        if let Err(e) = Notification::new()
            .summary(summary)
            .body(body)
            .icon("audio-speakers")
            .timeout(4000)
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }
}
