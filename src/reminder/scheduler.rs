use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::alarm::port::{AlarmPayload, AlarmPort};
use crate::clock::Clock;
use crate::error::ReminderError;
use crate::event::model::{DEFAULT_REMINDER_INTERVALS, Event, EventId};
use crate::reminder::token::{ReminderLabel, ReminderToken};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PlannedReminder {
    pub fire_at: DateTime<Utc>,
    pub label: ReminderLabel,
    pub token: ReminderToken,
}

pub struct ReminderScheduler {
    alarms: Arc<dyn AlarmPort>,
    clock: Arc<dyn Clock>,
    /// Labels registered per event by this process, consulted on cancel.
    scheduled_labels: Mutex<HashMap<EventId, BTreeSet<ReminderLabel>>>,
}

impl ReminderScheduler {
    pub fn new(alarms: Arc<dyn AlarmPort>, clock: Arc<dyn Clock>) -> Self {
        Self {
            alarms,
            clock,
            scheduled_labels: Mutex::new(HashMap::new()),
        }
    }

    pub fn plan_reminders(event: &Event, now: DateTime<Utc>) -> Vec<PlannedReminder> {
        if !event.has_reminders {
            return Vec::new();
        }

        let mut planned = Vec::with_capacity(event.intervals().len() + 1);
        for &minutes in event.intervals() {
            let fire_at = event.target - Duration::minutes(i64::from(minutes));
            if fire_at > now {
                let label = ReminderLabel::lead(minutes);
                planned.push(PlannedReminder {
                    fire_at,
                    label,
                    token: ReminderToken::derive(event.id, label),
                });
            }
        }

        if event.target > now {
            planned.push(PlannedReminder {
                fire_at: event.target,
                label: ReminderLabel::EventReached,
                token: ReminderToken::derive(event.id, ReminderLabel::EventReached),
            });
        }
        planned
    }

    /// Registers every future reminder of `event` and returns how many were
    /// registered. Not idempotent; use [`Self::reschedule_reminders`] after edits.
    pub async fn schedule_reminders(&self, event: &Event) -> Result<usize, ReminderError> {
        if !event.has_reminders {
            return Ok(0);
        }
        if !self.alarms.can_schedule_exact() {
            warn!(
                event_id = %event.id,
                title = %event.title,
                "cannot schedule exact alarms: permission not granted"
            );
            return Err(ReminderError::PermissionDenied { event_id: event.id });
        }

        let planned = Self::plan_reminders(event, self.clock.now());
        let mut registered = Vec::with_capacity(planned.len());
        for reminder in &planned {
            let payload = AlarmPayload {
                event_id: event.id,
                label: reminder.label,
            };
            if let Err(source) = self
                .alarms
                .schedule_exact_at(reminder.fire_at, reminder.token, payload)
                .await
            {
                self.remember(event.id, &registered);
                warn!(
                    event_id = %event.id,
                    token = %reminder.token,
                    scheduled = registered.len(),
                    planned = planned.len(),
                    "reminder registration failed: {source}"
                );
                return Err(ReminderError::PartialSchedule {
                    event_id: event.id,
                    scheduled: registered.len(),
                    planned: planned.len(),
                    source,
                });
            }
            registered.push(reminder.label);
        }

        self.remember(event.id, &registered);
        info!(event_id = %event.id, reminders = registered.len(), "reminders scheduled");
        Ok(registered.len())
    }

    pub async fn cancel_reminders(&self, event_id: EventId) -> usize {
        self.cancel_candidates(event_id, &[]).await
    }

    /// Cancel followed by schedule. Required after any change to the target,
    /// the interval set, or `has_reminders`.
    pub async fn reschedule_reminders(&self, event: &Event) -> Result<usize, ReminderError> {
        self.cancel_candidates(event.id, event.intervals()).await;
        self.schedule_reminders(event).await
    }

    async fn cancel_candidates(&self, event_id: EventId, configured: &[u32]) -> usize {
        let mut cancelled = 0;
        for label in self.cancellation_candidates(event_id, configured) {
            cancelled += self
                .alarms
                .cancel_by_token(ReminderToken::derive(event_id, label))
                .await;
        }
        self.forget(event_id);
        debug!(%event_id, cancelled, "reminders cancelled");
        cancelled
    }

    /// The alarm facility cannot be enumerated, so this reconstructs the labels
    /// that might be registered: the default lead times, the event-reached
    /// reminder, whatever this process registered for the event, and any
    /// lead times the caller knows the event is configured with.
    fn cancellation_candidates(&self, event_id: EventId, configured: &[u32]) -> BTreeSet<ReminderLabel> {
        let mut labels = DEFAULT_REMINDER_INTERVALS
            .iter()
            .chain(configured)
            .map(|&minutes| ReminderLabel::lead(minutes))
            .collect::<BTreeSet<_>>();
        labels.insert(ReminderLabel::EventReached);

        let ledger = self
            .scheduled_labels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(known) = ledger.get(&event_id) {
            labels.extend(known.iter().copied());
        }
        labels
    }

    fn remember(&self, event_id: EventId, labels: &[ReminderLabel]) {
        if labels.is_empty() {
            return;
        }
        self.scheduled_labels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_id)
            .or_default()
            .extend(labels.iter().copied());
    }

    fn forget(&self, event_id: EventId) {
        self.scheduled_labels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&event_id);
    }

    pub fn smart_intervals(target: DateTime<Utc>, now: DateTime<Utc>) -> Vec<u32> {
        let days = (target - now).num_days();
        match days {
            ..=1 => vec![5, 15, 30, 60],
            2..=7 => vec![5, 15, 60, 360, 1_440],
            8..=30 => vec![15, 60, 720, 1_440, 2_880],
            31..=365 => vec![60, 1_440, 2_880, 10_080, 43_200],
            _ => vec![1_440, 10_080, 43_200, 525_600],
        }
    }
}
