use thiserror::Error;

use crate::event::model::EventId;
use crate::reminder::token::ReminderToken;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event storage is locked until the device is unlocked")]
    Locked,
    #[error("event {0} not found")]
    NotFound(EventId),
    #[error("event storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("exact alarm permission is not granted")]
    PermissionDenied,
    #[error("alarm {token} could not be registered: {reason}")]
    Registration {
        token: ReminderToken,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("cannot schedule exact alarms for event {event_id}: permission not granted")]
    PermissionDenied { event_id: EventId },
    #[error("scheduled {scheduled} of {planned} reminders for event {event_id}: {source}")]
    PartialSchedule {
        event_id: EventId,
        scheduled: usize,
        planned: usize,
        #[source]
        source: AlarmError,
    },
}

#[derive(Debug, Error)]
pub enum OraError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reminder(#[from] ReminderError),
    #[error("maximum {max} events can be pinned")]
    PinLimitReached { max: usize },
    #[error("preferences could not be saved: {0}")]
    Preferences(String),
}
