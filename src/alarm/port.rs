use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::AlarmError;
use crate::event::model::EventId;
use crate::reminder::token::{ReminderLabel, ReminderToken};

/// What an alarm delivers when it fires. Only the id and label are trusted;
/// everything else is re-read from the store.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AlarmPayload {
    pub event_id: EventId,
    pub label: ReminderLabel,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScheduledAlarm {
    pub trigger_at: DateTime<Utc>,
    pub token: ReminderToken,
    pub payload: AlarmPayload,
}

/// Exact wake-up facility. It cannot enumerate what is registered, so callers
/// cancel by re-deriving tokens.
#[async_trait]
pub trait AlarmPort: Send + Sync {
    fn can_schedule_exact(&self) -> bool;

    async fn schedule_exact_at(
        &self,
        at: DateTime<Utc>,
        token: ReminderToken,
        payload: AlarmPayload,
    ) -> Result<(), AlarmError>;

    /// Cancels whatever is registered under `token` and returns how many
    /// registrations were removed. Zero is a normal outcome.
    async fn cancel_by_token(&self, token: ReminderToken) -> usize;
}

struct Registration {
    serial: u64,
    alarm: ScheduledAlarm,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    next_serial: u64,
    entries: Vec<Registration>,
}

/// In-process alarm facility: every registration is a tokio timer that sends
/// its payload on the fired channel and then forgets itself.
pub struct TimerAlarmPort {
    registry: Arc<Mutex<Registry>>,
    fired_tx: mpsc::UnboundedSender<AlarmPayload>,
    exact_allowed: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl TimerAlarmPort {
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<AlarmPayload>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let port = Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            fired_tx,
            exact_allowed: AtomicBool::new(true),
            clock,
        };
        (port, fired_rx)
    }

    pub fn set_exact_allowed(&self, allowed: bool) {
        self.exact_allowed.store(allowed, Ordering::SeqCst);
    }

    pub fn registered(&self) -> Vec<ScheduledAlarm> {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let mut alarms = registry
            .entries
            .iter()
            .map(|entry| entry.alarm.clone())
            .collect::<Vec<_>>();
        alarms.sort_by_key(|alarm| (alarm.trigger_at, alarm.token));
        alarms
    }
}

impl Drop for TimerAlarmPort {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in registry.entries.drain(..) {
            entry.handle.abort();
        }
    }
}

#[async_trait]
impl AlarmPort for TimerAlarmPort {
    fn can_schedule_exact(&self) -> bool {
        self.exact_allowed.load(Ordering::SeqCst)
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

        let delay = (at - self.clock.now()).to_std().unwrap_or_default();
        let mut registry = self.registry.lock().map_err(|_| AlarmError::Registration {
            token,
            reason: "alarm registry lock poisoned".to_string(),
        })?;
        let serial = registry.next_serial;
        registry.next_serial += 1;

        let registry_for_task = Arc::clone(&self.registry);
        let fired_tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry_for_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entries
                .retain(|entry| entry.serial != serial);
            if fired_tx.send(payload).is_err() {
                warn!(%token, "alarm fired with nobody listening");
            }
        });

        registry.entries.push(Registration {
            serial,
            alarm: ScheduledAlarm {
                trigger_at: at,
                token,
                payload,
            },
            handle,
        });
        debug!(%token, event_id = %payload.event_id, label = %payload.label, %at, "alarm registered");
        Ok(())
    }

    async fn cancel_by_token(&self, token: ReminderToken) -> usize {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cancelled = 0;
        registry.entries.retain(|entry| {
            if entry.alarm.token == token {
                entry.handle.abort();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        if cancelled > 0 {
            debug!(%token, cancelled, "alarm cancelled");
        }
        cancelled
    }
}
