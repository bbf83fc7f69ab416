use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::alarm::port::AlarmPayload;
use crate::event::store::EventStore;
use crate::notification::content::ReminderNotification;
use crate::notification::notifier::Notifier;
use crate::notification::service::NotificationControl;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FiredOutcome {
    Notified,
    Stale,
    Unavailable,
}

pub struct ReminderFiredHandler {
    store: Arc<dyn EventStore>,
    notifier: Arc<dyn Notifier>,
    service: Arc<dyn NotificationControl>,
}

impl ReminderFiredHandler {
    pub fn new(
        store: Arc<dyn EventStore>,
        notifier: Arc<dyn Notifier>,
        service: Arc<dyn NotificationControl>,
    ) -> Self {
        Self {
            store,
            notifier,
            service,
        }
    }

    pub async fn handle(&self, payload: AlarmPayload) -> FiredOutcome {
        // The countdown refresh must not depend on the event read below.
        self.service.start_or_update().await;

        let event = match self.store.event_by_id(payload.event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(event_id = %payload.event_id, label = %payload.label, "fired for a deleted event");
                return FiredOutcome::Stale;
            }
            Err(err) => {
                warn!(event_id = %payload.event_id, "reminder dropped, event unreadable: {err}");
                return FiredOutcome::Unavailable;
            }
        };
        if !event.has_reminders {
            debug!(event_id = %event.id, "reminders disabled since scheduling");
            return FiredOutcome::Stale;
        }

        self.notifier
            .show_reminder(&ReminderNotification::new(&event, payload.label));
        info!(event_id = %event.id, label = %payload.label, "reminder delivered");
        FiredOutcome::Notified
    }

    pub async fn run(self: Arc<Self>, mut fired: mpsc::UnboundedReceiver<AlarmPayload>) {
        while let Some(payload) = fired.recv().await {
            self.handle(payload).await;
        }
        debug!("fired alarm channel closed");
    }
}
