use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::PreferenceStore;
use crate::error::StoreError;
use crate::event::model::Event;
use crate::event::store::{EventSnapshot, EventStore, EventStream};
use crate::notification::content::{PersistentContent, refresh_interval, select_event_to_show};
use crate::notification::notifier::Notifier;

#[async_trait]
pub trait NotificationControl: Send + Sync {
    async fn start_or_update(&self);
    /// Stops the service. No render happens after this returns.
    async fn stop(&self);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayedNotificationState {
    pub running: bool,
    pub showing_placeholder: bool,
    pub current_event: Option<Event>,
    pub next_refresh_at: Option<DateTime<Utc>>,
    pub next_refresh_in: Option<Duration>,
    pub renders: u64,
}

enum Command {
    Resync,
}

enum Wake {
    Command(Option<Command>),
    Changed(Result<EventSnapshot, StoreError>),
    Tick,
}

struct Worker {
    commands: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

struct ServiceShared {
    store: Arc<dyn EventStore>,
    notifier: Arc<dyn Notifier>,
    preferences: Arc<dyn PreferenceStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<DisplayedNotificationState>,
}

/// Long-running countdown notification.
///
/// One task owns the notification. It re-renders on store changes, on its own
/// refresh timer and on request, and goes idle (notification removed, store
/// subscription dropped) once nothing upcoming is left.
pub struct PersistentNotificationService {
    shared: Arc<ServiceShared>,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl PersistentNotificationService {
    pub fn new(
        store: Arc<dyn EventStore>,
        notifier: Arc<dyn Notifier>,
        preferences: Arc<dyn PreferenceStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(ServiceShared {
                store,
                notifier,
                preferences,
                clock,
                state: Mutex::new(DisplayedNotificationState::default()),
            }),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> DisplayedNotificationState {
        self.shared.state().clone()
    }
}

#[async_trait]
impl NotificationControl for PersistentNotificationService {
    async fn start_or_update(&self) {
        let mut worker = self.worker.lock().await;
        if let Some(active) = worker.as_ref()
            && !active.handle.is_finished()
            && active.commands.send(Command::Resync).is_ok()
        {
            debug!("persistent notification resync requested");
            return;
        }

        let (commands, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_service(Arc::clone(&self.shared), rx));
        *worker = Some(Worker { commands, handle });
        info!("persistent notification service started");
    }

    async fn stop(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        drop(worker.commands);
        if let Err(err) = worker.handle.await {
            warn!("persistent notification task ended abnormally: {err}");
        }
        info!("persistent notification service stopped");
    }
}

async fn run_service(shared: Arc<ServiceShared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut stream: Option<EventStream> = None;
    let mut next_tick: Option<Instant> = None;
    let mut resync = true;

    loop {
        if resync {
            resync = false;
            if !shared.state().running {
                shared.show_placeholder();
            }
            next_tick = shared.resync(&mut stream).await;
        }

        let wake = tokio::select! {
            biased;
            command = commands.recv() => Wake::Command(command),
            changed = next_change(&mut stream) => Wake::Changed(changed),
            () = sleep_until(next_tick) => Wake::Tick,
        };

        match wake {
            Wake::Command(Some(Command::Resync)) => resync = true,
            Wake::Command(None) => break,
            Wake::Changed(Ok(events)) => next_tick = shared.apply(&events, &mut stream),
            Wake::Changed(Err(err)) => {
                warn!("event stream ended: {err}");
                stream = None;
            }
            Wake::Tick => match shared.tick_events(&mut stream).await {
                Ok(events) => next_tick = shared.apply(&events, &mut stream),
                Err(err) => {
                    warn!("refresh skipped: {err}");
                    next_tick = None;
                }
            },
        }
    }

    shared.notifier.clear_persistent();
    let mut state = shared.state();
    let renders = state.renders;
    *state = DisplayedNotificationState {
        renders,
        ..DisplayedNotificationState::default()
    };
}

async fn next_change(stream: &mut Option<EventStream>) -> Result<EventSnapshot, StoreError> {
    match stream {
        Some(stream) => {
            stream.changed().await?;
            Ok(stream.latest())
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl ServiceShared {
    fn state(&self) -> std::sync::MutexGuard<'_, DisplayedNotificationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn show_placeholder(&self) {
        self.notifier.show_persistent(&PersistentContent::placeholder());
        let mut state = self.state();
        state.running = true;
        state.showing_placeholder = true;
    }

    async fn resync(&self, stream: &mut Option<EventStream>) -> Option<Instant> {
        let events = match self.store.all_events().await {
            Ok(events) => events,
            Err(StoreError::Locked) => {
                info!("event storage locked; keeping placeholder");
                return None;
            }
            Err(err) => {
                warn!("unable to read events for the notification: {err}");
                return None;
            }
        };

        if stream.is_none() {
            match self.store.subscribe() {
                Ok(subscribed) => *stream = Some(subscribed),
                Err(err) => warn!("unable to observe event changes: {err}"),
            }
        }
        if let Some(stream) = stream.as_mut() {
            stream.latest();
        }
        self.apply(&events, stream)
    }

    async fn tick_events(&self, stream: &mut Option<EventStream>) -> Result<EventSnapshot, StoreError> {
        match stream {
            Some(stream) => Ok(stream.latest()),
            None => Ok(Arc::new(self.store.all_events().await?)),
        }
    }

    fn apply(&self, events: &[Event], stream: &mut Option<EventStream>) -> Option<Instant> {
        let now = self.clock.now();
        let Some(selected) = select_event_to_show(events, now) else {
            self.go_idle(stream);
            return None;
        };

        let preferences = self.preferences.load();
        let content = PersistentContent::render(selected, events, &preferences, now);
        self.notifier.show_persistent(&content);

        let interval = refresh_interval(selected.target - now);
        let mut state = self.state();
        state.running = true;
        state.showing_placeholder = false;
        state.current_event = Some(selected.clone());
        state.next_refresh_in = Some(interval);
        state.next_refresh_at = chrono::Duration::from_std(interval)
            .ok()
            .map(|interval| now + interval);
        state.renders += 1;
        debug!(event_id = %selected.id, refresh_in = ?interval, "persistent notification rendered");
        Some(Instant::now() + interval)
    }

    fn go_idle(&self, stream: &mut Option<EventStream>) {
        *stream = None;
        self.notifier.clear_persistent();
        let mut state = self.state();
        let was_running = state.running;
        let renders = state.renders;
        *state = DisplayedNotificationState {
            renders,
            ..DisplayedNotificationState::default()
        };
        if was_running {
            info!("no upcoming events; persistent notification stopped");
        }
    }
}
