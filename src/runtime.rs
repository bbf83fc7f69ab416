use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::alarm::port::AlarmPayload;
use crate::boot::BootRestoreCoordinator;
use crate::clock::Clock;
use crate::config::{self, BootFlagStore, PreferenceStore};
use crate::error::{OraError, ReminderError, StoreError};
use crate::event::model::{Event, EventId, MAX_PINNED_EVENTS, NewEvent};
use crate::event::store::EventStore;
use crate::notification::notifier::Notifier;
use crate::notification::service::NotificationControl;
use crate::reminder::fired::ReminderFiredHandler;
use crate::reminder::scheduler::ReminderScheduler;

/// Result of a mutation that also touched the event's reminders. The event is
/// committed even when `reminders` is an error.
#[derive(Debug)]
pub struct EventChange {
    pub event: Event,
    pub reminders: Result<usize, ReminderError>,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct RestoreSummary {
    pub events: usize,
    pub alarms: usize,
    pub permission_denied: bool,
}

/// Owns the collaborators and runs the app-level flows: every mutation is
/// committed first, then reminders and the persistent notification follow.
pub struct OraRuntime {
    store: Arc<dyn EventStore>,
    scheduler: Arc<ReminderScheduler>,
    notifier: Arc<dyn Notifier>,
    service: Arc<dyn NotificationControl>,
    preferences: Arc<dyn PreferenceStore>,
    boot_flags: Arc<dyn BootFlagStore>,
    clock: Arc<dyn Clock>,
}

impl OraRuntime {
    pub fn new(
        store: Arc<dyn EventStore>,
        scheduler: Arc<ReminderScheduler>,
        notifier: Arc<dyn Notifier>,
        service: Arc<dyn NotificationControl>,
        preferences: Arc<dyn PreferenceStore>,
        boot_flags: Arc<dyn BootFlagStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scheduler,
            notifier,
            service,
            preferences,
            boot_flags,
            clock,
        }
    }

    pub fn boot_coordinator(&self) -> BootRestoreCoordinator {
        BootRestoreCoordinator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.service),
            Arc::clone(&self.preferences),
            Arc::clone(&self.boot_flags),
        )
    }

    pub fn spawn_fired_loop(&self, fired: mpsc::UnboundedReceiver<AlarmPayload>) -> JoinHandle<()> {
        let handler = Arc::new(ReminderFiredHandler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.notifier),
            Arc::clone(&self.service),
        ));
        tokio::spawn(handler.run(fired))
    }

    pub async fn start_or_update_persistent_notification(&self) {
        self.service.start_or_update().await;
    }

    pub async fn stop_persistent_notification(&self) {
        self.service.stop().await;
    }

    pub fn notifications_enabled(&self) -> bool {
        config::notifications_enabled(self.preferences.as_ref(), self.boot_flags.as_ref())
    }

    pub async fn create_event(&self, event: NewEvent) -> Result<EventChange, OraError> {
        let event = self.store.insert_event(event).await?;
        let reminders = self.scheduler.schedule_reminders(&event).await;
        self.refresh_notification().await;
        info!(event_id = %event.id, title = %event.title, "event created");
        Ok(EventChange { event, reminders })
    }

    pub async fn update_event(&self, event: Event) -> Result<EventChange, OraError> {
        self.store.update_event(event.clone()).await?;
        let reminders = if event.has_reminders {
            self.scheduler.reschedule_reminders(&event).await
        } else {
            self.scheduler.cancel_reminders(event.id).await;
            Ok(0)
        };
        self.refresh_notification().await;
        Ok(EventChange { event, reminders })
    }

    pub async fn delete_event(&self, id: EventId) -> Result<Option<Event>, OraError> {
        self.scheduler.cancel_reminders(id).await;
        let removed = self.store.delete_event(id).await?;
        self.refresh_notification().await;
        Ok(removed)
    }

    pub async fn toggle_pin(&self, id: EventId) -> Result<Event, OraError> {
        let mut event = self
            .store
            .event_by_id(id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        if !event.is_pinned && self.store.pinned_count().await? >= MAX_PINNED_EVENTS {
            return Err(OraError::PinLimitReached {
                max: MAX_PINNED_EVENTS,
            });
        }

        event.is_pinned = !event.is_pinned;
        self.store.set_pinned(id, event.is_pinned).await?;
        self.refresh_notification().await;
        Ok(event)
    }

    pub async fn set_notifications_enabled(&self, enabled: bool) -> Result<RestoreSummary, OraError> {
        config::set_notifications_enabled(
            self.preferences.as_ref(),
            self.boot_flags.as_ref(),
            enabled,
        )
        .map_err(|err| OraError::Preferences(format!("{err:#}")))?;

        if enabled {
            let summary = self.reschedule_all().await?;
            self.service.start_or_update().await;
            Ok(summary)
        } else {
            self.cancel_all().await?;
            self.service.stop().await;
            Ok(RestoreSummary::default())
        }
    }

    pub async fn set_notification_display(&self, multiple: bool, max_events: usize) -> Result<(), OraError> {
        let mut preferences = self.preferences.load();
        preferences.multiple_events_notification = multiple;
        preferences.max_events_in_notification = max_events;
        self.preferences
            .save(&preferences)
            .map_err(|err| OraError::Preferences(format!("{err:#}")))?;
        self.refresh_notification().await;
        Ok(())
    }

    /// Deletes expired unpinned events when auto-delete is on, otherwise
    /// archives every expired event. Returns how many events changed.
    pub async fn sweep_expired(&self) -> Result<usize, OraError> {
        let now = self.clock.now();
        let swept = if self.preferences.load().auto_delete_expired {
            let mut deleted = 0;
            for event in self.store.expired_events(now).await? {
                if event.is_pinned {
                    continue;
                }
                self.scheduler.cancel_reminders(event.id).await;
                if self.store.delete_event(event.id).await?.is_some() {
                    deleted += 1;
                }
            }
            deleted
        } else {
            self.store.deactivate_expired(now).await?
        };

        if swept > 0 {
            info!(swept, "expired events swept");
        }
        Ok(swept)
    }

    pub async fn restore_on_launch(&self) -> Result<RestoreSummary, OraError> {
        if !self.notifications_enabled() {
            self.service.stop().await;
            self.cancel_all().await?;
            return Ok(RestoreSummary::default());
        }

        self.sweep_expired().await?;
        let summary = self.reschedule_all().await?;
        self.service.start_or_update().await;
        Ok(summary)
    }

    async fn refresh_notification(&self) {
        if self.notifications_enabled() {
            self.service.start_or_update().await;
        }
    }

    async fn reschedule_all(&self) -> Result<RestoreSummary, OraError> {
        let mut summary = RestoreSummary::default();
        for event in self.store.all_events().await? {
            if !event.has_reminders {
                continue;
            }
            match self.scheduler.reschedule_reminders(&event).await {
                Ok(alarms) => {
                    summary.events += 1;
                    summary.alarms += alarms;
                }
                Err(ReminderError::PermissionDenied { event_id }) => {
                    if !summary.permission_denied {
                        warn!(%event_id, "exact alarms not permitted; reminders skipped");
                    }
                    summary.permission_denied = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(summary)
    }

    async fn cancel_all(&self) -> Result<usize, OraError> {
        let mut cancelled = 0;
        for event in self.store.all_events().await? {
            cancelled += self.scheduler.cancel_reminders(event.id).await;
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::config::{MemoryBootFlags, MemoryPreferences, Preferences};
    use crate::event::store::MemoryEventStore;
    use crate::test_support::{
        RecordingAlarmPort, RecordingControl, RecordingNotifier, base_time, fixed_clock,
    };

    struct Harness {
        store: Arc<MemoryEventStore>,
        port: Arc<RecordingAlarmPort>,
        control: Arc<RecordingControl>,
        preferences: Arc<MemoryPreferences>,
        flags: Arc<MemoryBootFlags>,
        clock: Arc<crate::clock::ManualClock>,
        runtime: OraRuntime,
    }

    fn harness(enabled: bool) -> Harness {
        let clock = fixed_clock();
        let store = Arc::new(MemoryEventStore::new(clock.clone()));
        harness_with_store(enabled, clock, store)
    }

    fn harness_with_store(
        enabled: bool,
        clock: Arc<crate::clock::ManualClock>,
        store: Arc<MemoryEventStore>,
    ) -> Harness {
        let port = Arc::new(RecordingAlarmPort::new());
        let control = Arc::new(RecordingControl::default());
        let preferences = Arc::new(MemoryPreferences::new(Preferences {
            notifications_enabled: enabled,
            ..Preferences::default()
        }));
        let flags = Arc::new(MemoryBootFlags::default());
        let runtime = OraRuntime::new(
            store.clone(),
            Arc::new(ReminderScheduler::new(port.clone(), clock.clone())),
            Arc::new(RecordingNotifier::default()),
            control.clone(),
            preferences.clone(),
            flags.clone(),
            clock.clone(),
        );
        Harness {
            store,
            port,
            control,
            preferences,
            flags,
            clock,
            runtime,
        }
    }

    #[tokio::test]
    async fn creating_an_event_schedules_and_refreshes() {
        let h = harness(true);
        let change = h
            .runtime
            .create_event(NewEvent::new("launch", base_time() + Duration::days(3)))
            .await
            .expect("create");

        assert_eq!(change.reminders.expect("scheduled"), 5);
        assert_eq!(h.port.registered().len(), 5);
        assert_eq!(h.control.calls(), vec!["start"]);
    }

    #[tokio::test]
    async fn failed_write_creates_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = fixed_clock();
        let path = dir.path().join("missing").join("events.json");
        let store = Arc::new(MemoryEventStore::open(&path, clock.clone()).expect("open"));
        let h = harness_with_store(true, clock, store);
        let mut stream = h.store.subscribe().expect("subscribe");

        let created = h
            .runtime
            .create_event(NewEvent::new("launch", base_time() + Duration::days(3)))
            .await;
        assert!(matches!(
            created,
            Err(OraError::Store(StoreError::Unavailable(_)))
        ));
        assert!(h.store.all_events().await.expect("read").is_empty());
        assert!(stream.latest().is_empty());
        assert!(h.port.registered().is_empty());
        assert!(h.control.calls().is_empty());
    }

    #[tokio::test]
    async fn creating_without_permission_still_commits_the_event() {
        let h = harness(false);
        h.port.set_allowed(false);
        let change = h
            .runtime
            .create_event(NewEvent::new("launch", base_time() + Duration::days(3)))
            .await
            .expect("create");

        assert!(matches!(
            change.reminders,
            Err(ReminderError::PermissionDenied { .. })
        ));
        assert!(h.store.event_by_id(change.event.id).await.expect("read").is_some());
        assert!(h.control.calls().is_empty());
    }

    #[tokio::test]
    async fn turning_reminders_off_cancels_them() {
        let h = harness(true);
        let mut event = h
            .runtime
            .create_event(NewEvent::new("launch", base_time() + Duration::days(3)))
            .await
            .expect("create")
            .event;

        event.has_reminders = false;
        let change = h.runtime.update_event(event).await.expect("update");
        assert_eq!(change.reminders.expect("cancelled"), 0);
        assert!(h.port.registered().is_empty());
    }

    #[tokio::test]
    async fn deleting_cancels_before_removing() {
        let h = harness(true);
        let event = h
            .runtime
            .create_event(NewEvent::new("launch", base_time() + Duration::days(3)))
            .await
            .expect("create")
            .event;

        let removed = h.runtime.delete_event(event.id).await.expect("delete");
        assert_eq!(removed.map(|removed| removed.id), Some(event.id));
        assert!(h.port.registered().is_empty());
        assert_eq!(h.control.calls(), vec!["start", "start"]);
    }

    #[tokio::test]
    async fn pinning_a_fourth_event_is_refused() {
        let h = harness(false);
        let mut ids = Vec::new();
        for day in 1..=4 {
            let event = h
                .runtime
                .create_event(NewEvent::new(format!("e{day}"), base_time() + Duration::days(day)))
                .await
                .expect("create")
                .event;
            ids.push(event.id);
        }
        for id in &ids[..3] {
            assert!(h.runtime.toggle_pin(*id).await.expect("pin").is_pinned);
        }

        let err = h.runtime.toggle_pin(ids[3]).await.expect_err("limit");
        assert!(matches!(err, OraError::PinLimitReached { max: 3 }));

        assert!(!h.runtime.toggle_pin(ids[0]).await.expect("unpin").is_pinned);
        assert!(h.runtime.toggle_pin(ids[3]).await.expect("pin").is_pinned);
    }

    #[tokio::test]
    async fn toggling_notifications_writes_both_stores() {
        let h = harness(false);
        h.runtime
            .create_event(NewEvent::new("launch", base_time() + Duration::days(3)))
            .await
            .expect("create");

        let summary = h.runtime.set_notifications_enabled(true).await.expect("enable");
        assert_eq!(summary.events, 1);
        assert_eq!(summary.alarms, 5);
        assert!(h.preferences.load().notifications_enabled);
        assert_eq!(h.flags.notifications_enabled(), Some(true));

        h.runtime.set_notifications_enabled(false).await.expect("disable");
        assert!(!h.preferences.load().notifications_enabled);
        assert_eq!(h.flags.notifications_enabled(), Some(false));
        assert!(h.port.registered().is_empty());
        assert_eq!(h.control.calls(), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn display_limit_is_validated() {
        let h = harness(true);
        let err = h
            .runtime
            .set_notification_display(true, 0)
            .await
            .expect_err("range");
        assert!(matches!(err, OraError::Preferences(_)));

        h.runtime.set_notification_display(true, 5).await.expect("valid");
        let preferences = h.preferences.load();
        assert!(preferences.multiple_events_notification);
        assert_eq!(preferences.max_events_in_notification, 5);
        assert_eq!(h.control.calls(), vec!["start"]);
    }

    #[tokio::test]
    async fn sweep_archives_or_deletes_expired_events() {
        let h = harness(false);
        let old = h
            .runtime
            .create_event(NewEvent::new("old", base_time() + Duration::hours(1)))
            .await
            .expect("create")
            .event;
        let mut pinned = NewEvent::new("pinned", base_time() + Duration::hours(1));
        pinned.is_pinned = true;
        h.runtime.create_event(pinned).await.expect("create");
        h.clock.advance(Duration::hours(2));

        assert_eq!(h.runtime.sweep_expired().await.expect("archive"), 2);
        let archived = h.store.event_by_id(old.id).await.expect("read").expect("kept");
        assert!(!archived.is_active);

        let h = harness(false);
        h.preferences
            .save(&Preferences {
                auto_delete_expired: true,
                ..Preferences::default()
            })
            .expect("save");
        let old = h
            .runtime
            .create_event(NewEvent::new("old", base_time() + Duration::hours(1)))
            .await
            .expect("create")
            .event;
        let mut pinned = NewEvent::new("pinned", base_time() + Duration::hours(1));
        pinned.is_pinned = true;
        h.runtime.create_event(pinned).await.expect("create");
        h.clock.advance(Duration::hours(2));

        assert_eq!(h.runtime.sweep_expired().await.expect("delete"), 1);
        assert!(h.store.event_by_id(old.id).await.expect("read").is_none());
        assert_eq!(h.store.all_events().await.expect("read").len(), 1);
    }

    #[tokio::test]
    async fn launch_with_notifications_off_cancels_everything() {
        let h = harness(true);
        let event = h
            .runtime
            .create_event(NewEvent::new("launch", base_time() + Duration::days(3)))
            .await
            .expect("create")
            .event;
        h.flags.set_notifications_enabled(false).expect("flag");

        let summary = h.runtime.restore_on_launch().await.expect("restore");
        assert_eq!(summary, RestoreSummary::default());
        assert!(h.port.registered().is_empty());
        assert_eq!(h.control.calls(), vec!["start", "stop"]);
        assert!(h.store.event_by_id(event.id).await.expect("read").is_some());
    }

    #[tokio::test]
    async fn launch_with_notifications_on_restores_alarms() {
        let h = harness(true);
        h.store
            .insert_event(NewEvent::new("direct", base_time() + Duration::days(3)))
            .await
            .expect("insert");
        assert!(h.port.registered().is_empty());

        let summary = h.runtime.restore_on_launch().await.expect("restore");
        assert_eq!(summary.alarms, 5);
        assert_eq!(h.port.registered().len(), 5);
        assert_eq!(h.control.calls(), vec!["start"]);
    }

    #[tokio::test]
    async fn persistent_notification_controls_pass_through() {
        let h = harness(false);
        h.runtime.start_or_update_persistent_notification().await;
        h.runtime.stop_persistent_notification().await;
        assert_eq!(h.control.calls(), vec!["start", "stop"]);
    }
}
