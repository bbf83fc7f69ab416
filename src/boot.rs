use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{BootFlagStore, PreferenceStore, notifications_enabled};
use crate::error::ReminderError;
use crate::event::store::EventStore;
use crate::notification::service::NotificationControl;
use crate::reminder::scheduler::ReminderScheduler;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BootPhase {
    /// Booted but not yet unlocked; only the boot flags are readable.
    LockedBoot,
    UserUnlocked,
    PackageReplaced,
}

impl fmt::Display for BootPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LockedBoot => "locked-boot",
            Self::UserUnlocked => "user-unlocked",
            Self::PackageReplaced => "package-replaced",
        })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum BootOutcome {
    NotificationsDisabled,
    PlaceholderStarted,
    Restored {
        rescheduled: usize,
        alarms: usize,
        permission_denied: bool,
    },
    Aborted {
        reason: String,
    },
}

impl fmt::Display for BootOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotificationsDisabled => f.write_str("notifications disabled, nothing restored"),
            Self::PlaceholderStarted => f.write_str("persistent notification started with placeholder"),
            Self::Restored {
                rescheduled,
                alarms,
                permission_denied,
            } => {
                write!(f, "restored {rescheduled} events ({alarms} alarms)")?;
                if *permission_denied {
                    f.write_str("; exact alarm permission missing")?;
                }
                Ok(())
            }
            Self::Aborted { reason } => write!(f, "restore aborted: {reason}"),
        }
    }
}

pub struct BootRestoreCoordinator {
    store: Arc<dyn EventStore>,
    scheduler: Arc<ReminderScheduler>,
    service: Arc<dyn NotificationControl>,
    preferences: Arc<dyn PreferenceStore>,
    boot_flags: Arc<dyn BootFlagStore>,
}

impl BootRestoreCoordinator {
    pub fn new(
        store: Arc<dyn EventStore>,
        scheduler: Arc<ReminderScheduler>,
        service: Arc<dyn NotificationControl>,
        preferences: Arc<dyn PreferenceStore>,
        boot_flags: Arc<dyn BootFlagStore>,
    ) -> Self {
        Self {
            store,
            scheduler,
            service,
            preferences,
            boot_flags,
        }
    }

    pub async fn on_boot(&self, phase: BootPhase) -> BootOutcome {
        info!(%phase, "boot restore");
        let outcome = match phase {
            BootPhase::LockedBoot => self.locked_boot().await,
            BootPhase::UserUnlocked | BootPhase::PackageReplaced => self.restore().await,
        };
        info!(%phase, %outcome, "boot restore finished");
        outcome
    }

    async fn locked_boot(&self) -> BootOutcome {
        if self.boot_flags.notifications_enabled() != Some(true) {
            return BootOutcome::NotificationsDisabled;
        }
        self.service.start_or_update().await;
        BootOutcome::PlaceholderStarted
    }

    async fn restore(&self) -> BootOutcome {
        if !notifications_enabled(self.preferences.as_ref(), self.boot_flags.as_ref()) {
            return BootOutcome::NotificationsDisabled;
        }

        let events = match self.store.all_events().await {
            Ok(events) => events,
            Err(err) => {
                error!("unable to read events during boot restore: {err}");
                return BootOutcome::Aborted {
                    reason: err.to_string(),
                };
            }
        };

        let mut rescheduled = 0;
        let mut alarms = 0;
        let mut permission_denied = false;
        for event in events.iter().filter(|event| event.has_reminders) {
            match self.scheduler.reschedule_reminders(event).await {
                Ok(count) => {
                    rescheduled += 1;
                    alarms += count;
                }
                Err(ReminderError::PermissionDenied { event_id }) => {
                    if !permission_denied {
                        warn!(%event_id, "exact alarms not permitted; reminders stay off until granted");
                    }
                    permission_denied = true;
                }
                Err(err) => {
                    error!(event_id = %event.id, "boot restore stopped: {err}");
                    return BootOutcome::Aborted {
                        reason: err.to_string(),
                    };
                }
            }
        }

        self.service.start_or_update().await;
        BootOutcome::Restored {
            rescheduled,
            alarms,
            permission_denied,
        }
    }
}
