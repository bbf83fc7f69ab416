use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::alarm::port::{AlarmPayload, AlarmPort, ScheduledAlarm};
use crate::clock::ManualClock;
use crate::error::AlarmError;
use crate::event::model::{DEFAULT_EVENT_COLOR, Event, EventId};
use crate::notification::content::{PersistentContent, ReminderNotification};
use crate::notification::notifier::Notifier;
use crate::notification::service::NotificationControl;
use crate::reminder::token::ReminderToken;

pub(crate) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 7, 7, 30, 0)
        .single()
        .expect("valid base time")
}

pub(crate) fn fixed_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(base_time()))
}

pub(crate) fn event_at(id: i64, target: DateTime<Utc>) -> Event {
    Event {
        id: EventId(id),
        title: format!("event {id}"),
        description: String::new(),
        target,
        created: base_time(),
        is_active: true,
        is_pinned: false,
        has_reminders: true,
        reminder_intervals: None,
        color: DEFAULT_EVENT_COLOR.to_string(),
    }
}

pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub(crate) struct RecordingAlarmPort {
    alarms: Mutex<Vec<ScheduledAlarm>>,
    fail_after: Option<usize>,
    allowed: AtomicBool,
}

impl RecordingAlarmPort {
    pub(crate) fn new() -> Self {
        Self {
            alarms: Mutex::new(Vec::new()),
            fail_after: None,
            allowed: AtomicBool::new(true),
        }
    }

    pub(crate) fn failing_after(count: usize) -> Self {
        Self {
            fail_after: Some(count),
            ..Self::new()
        }
    }

    pub(crate) fn set_allowed(&self, allowed: bool) {
        self.allowed.store(allowed, Ordering::SeqCst);
    }

    pub(crate) fn registered(&self) -> Vec<ScheduledAlarm> {
        self.alarms.lock().expect("alarms lock").clone()
    }
}

#[async_trait]
impl AlarmPort for RecordingAlarmPort {
    fn can_schedule_exact(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }

    async fn schedule_exact_at(
        &self,
        at: DateTime<Utc>,
        token: ReminderToken,
        payload: AlarmPayload,
    ) -> Result<(), AlarmError> {
        if !self.can_schedule_exact() {
            return Err(AlarmError::PermissionDenied);
        }
        let mut alarms = self.alarms.lock().expect("alarms lock");
        if self.fail_after.is_some_and(|limit| alarms.len() >= limit) {
            return Err(AlarmError::Registration {
                token,
                reason: "rejected by test port".to_string(),
            });
        }
        alarms.push(ScheduledAlarm {
            trigger_at: at,
            token,
            payload,
        });
        Ok(())
    }

    async fn cancel_by_token(&self, token: ReminderToken) -> usize {
        let mut alarms = self.alarms.lock().expect("alarms lock");
        let before = alarms.len();
        alarms.retain(|alarm| alarm.token != token);
        before - alarms.len()
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    reminders: Mutex<Vec<ReminderNotification>>,
    persistent: Mutex<Vec<PersistentContent>>,
    cleared: AtomicUsize,
}

impl RecordingNotifier {
    pub(crate) fn reminders(&self) -> Vec<ReminderNotification> {
        self.reminders.lock().expect("reminders lock").clone()
    }

    pub(crate) fn persistent(&self) -> Vec<PersistentContent> {
        self.persistent.lock().expect("persistent lock").clone()
    }

    pub(crate) fn cleared(&self) -> usize {
        self.cleared.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn show_reminder(&self, notification: &ReminderNotification) {
        self.reminders
            .lock()
            .expect("reminders lock")
            .push(notification.clone());
    }

    fn show_persistent(&self, content: &PersistentContent) {
        self.persistent
            .lock()
            .expect("persistent lock")
            .push(content.clone());
    }

    fn clear_persistent(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct RecordingControl {
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingControl {
    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl NotificationControl for RecordingControl {
    async fn start_or_update(&self) {
        self.calls.lock().expect("calls lock").push("start");
    }

    async fn stop(&self) {
        self.calls.lock().expect("calls lock").push("stop");
    }
}
