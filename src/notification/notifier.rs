use std::sync::{Mutex, PoisonError};

use tracing::info;

use crate::notification::content::{PersistentContent, ReminderNotification};

pub trait Notifier: Send + Sync {
    fn show_reminder(&self, notification: &ReminderNotification);
    fn show_persistent(&self, content: &PersistentContent);
    fn clear_persistent(&self);
}

/// Writes notifications to the log, skipping persistent updates whose text
/// did not change since the last post.
#[derive(Debug, Default)]
pub struct LogNotifier {
    last_persistent: Mutex<Option<PersistentContent>>,
}

impl Notifier for LogNotifier {
    fn show_reminder(&self, notification: &ReminderNotification) {
        info!(
            event_id = %notification.event_id,
            label = %notification.label,
            "{}: {}",
            notification.title,
            notification.message
        );
    }

    fn show_persistent(&self, content: &PersistentContent) {
        let mut last = self
            .last_persistent
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(content) {
            return;
        }

        if content.is_placeholder() {
            info!("{}", content.title);
        } else {
            info!(
                progress = %format!("{:.0}%", content.progress * 100.0),
                "{}: {} ({})",
                content.title,
                content.countdown,
                content.time_until
            );
            for line in &content.summary {
                info!("  {}: {}", line.title, line.countdown);
            }
        }
        *last = Some(content.clone());
    }

    fn clear_persistent(&self) {
        let mut last = self
            .last_persistent
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.take().is_some() {
            info!("persistent notification removed");
        }
    }
}
