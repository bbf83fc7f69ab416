use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::event::model::{Event, EventId, EventsFile, NewEvent, load_events, save_events};

pub type EventSnapshot = Arc<Vec<Event>>;

#[derive(Debug, Clone)]
pub struct EventStream {
    rx: watch::Receiver<EventSnapshot>,
}

impl EventStream {
    pub fn latest(&mut self) -> EventSnapshot {
        Arc::clone(&self.rx.borrow_and_update())
    }

    pub async fn changed(&mut self) -> Result<(), StoreError> {
        self.rx
            .changed()
            .await
            .map_err(|_| StoreError::Unavailable("event store closed".to_string()))
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn all_events(&self) -> Result<Vec<Event>, StoreError>;
    async fn upcoming_events(&self, now: DateTime<Utc>) -> Result<Vec<Event>, StoreError>;
    async fn expired_events(&self, now: DateTime<Utc>) -> Result<Vec<Event>, StoreError>;
    async fn event_by_id(&self, id: EventId) -> Result<Option<Event>, StoreError>;
    fn subscribe(&self) -> Result<EventStream, StoreError>;

    async fn insert_event(&self, event: NewEvent) -> Result<Event, StoreError>;
    async fn update_event(&self, event: Event) -> Result<(), StoreError>;
    async fn delete_event(&self, id: EventId) -> Result<Option<Event>, StoreError>;
    async fn set_pinned(&self, id: EventId, pinned: bool) -> Result<(), StoreError>;
    async fn pinned_count(&self) -> Result<usize, StoreError>;
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[derive(Clone)]
struct StoreState {
    events: BTreeMap<EventId, Event>,
    next_id: i64,
}

/// In-memory event store with an optional JSON file behind it.
///
/// While locked (before the first unlock after boot) every operation fails
/// with [`StoreError::Locked`].
pub struct MemoryEventStore {
    state: Mutex<StoreState>,
    changes: watch::Sender<EventSnapshot>,
    locked: AtomicBool,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl MemoryEventStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_events(
            clock,
            EventsFile {
                next_id: 1,
                events: Vec::new(),
            },
        )
    }

    pub fn with_events(clock: Arc<dyn Clock>, file: EventsFile) -> Self {
        let events = file
            .events
            .into_iter()
            .map(|event| (event.id, event))
            .collect::<BTreeMap<_, _>>();
        let state = StoreState {
            events,
            next_id: file.next_id.max(1),
        };
        let (changes, _) = watch::channel(Arc::new(snapshot_of(&state)));
        Self {
            state: Mutex::new(state),
            changes,
            locked: AtomicBool::new(false),
            path: None,
            clock,
        }
    }

    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let file = if path.exists() {
            load_events(path)?
        } else {
            EventsFile {
                next_id: 1,
                events: Vec::new(),
            }
        };
        let mut store = Self::with_events(clock, file);
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    pub fn lock_storage(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub fn unlock_storage(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn state(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        if self.is_locked() {
            return Err(StoreError::Locked);
        }
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("event store lock poisoned".to_string()))
    }

    // Writes `next` through to the file, then makes it live. A failed write
    // leaves both the state and the change stream untouched.
    fn commit(&self, state: &mut StoreState, next: StoreState) -> Result<(), StoreError> {
        let snapshot = snapshot_of(&next);
        if let Some(path) = &self.path {
            save_events(path, &snapshot, next.next_id)
                .map_err(|err| StoreError::Unavailable(format!("{err:#}")))?;
        }
        *state = next;
        debug!(events = snapshot.len(), "event store changed");
        self.changes.send_replace(Arc::new(snapshot));
        Ok(())
    }
}

/// Newest first, matching the list the UI shows.
fn snapshot_of(state: &StoreState) -> Vec<Event> {
    let mut events = state.events.values().cloned().collect::<Vec<_>>();
    events.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.id.cmp(&a.id)));
    events
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn all_events(&self) -> Result<Vec<Event>, StoreError> {
        let state = self.state()?;
        Ok(snapshot_of(&state))
    }

    async fn upcoming_events(&self, now: DateTime<Utc>) -> Result<Vec<Event>, StoreError> {
        let state = self.state()?;
        let mut upcoming = state
            .events
            .values()
            .filter(|event| event.is_active && event.is_upcoming(now))
            .cloned()
            .collect::<Vec<_>>();
        upcoming.sort_by_key(|event| event.target);
        Ok(upcoming)
    }

    async fn expired_events(&self, now: DateTime<Utc>) -> Result<Vec<Event>, StoreError> {
        let state = self.state()?;
        Ok(state
            .events
            .values()
            .filter(|event| event.is_active && !event.is_upcoming(now))
            .cloned()
            .collect())
    }

    async fn event_by_id(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let state = self.state()?;
        Ok(state.events.get(&id).cloned())
    }

    fn subscribe(&self) -> Result<EventStream, StoreError> {
        if self.is_locked() {
            return Err(StoreError::Locked);
        }
        Ok(EventStream {
            rx: self.changes.subscribe(),
        })
    }

    async fn insert_event(&self, event: NewEvent) -> Result<Event, StoreError> {
        let mut state = self.state()?;
        let mut next = state.clone();
        let id = EventId(next.next_id);
        next.next_id = next
            .next_id
            .checked_add(1)
            .ok_or_else(|| StoreError::Unavailable("event id space exhausted".to_string()))?;
        let stored = Event {
            id,
            title: event.title,
            description: event.description,
            target: event.target,
            created: self.clock.now(),
            is_active: true,
            is_pinned: event.is_pinned,
            has_reminders: event.has_reminders,
            reminder_intervals: event.reminder_intervals,
            color: event.color,
        };
        next.events.insert(id, stored.clone());
        self.commit(&mut state, next)?;
        Ok(stored)
    }

    async fn update_event(&self, event: Event) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let mut next = state.clone();
        let Some(slot) = next.events.get_mut(&event.id) else {
            return Err(StoreError::NotFound(event.id));
        };
        *slot = event;
        self.commit(&mut state, next)
    }

    async fn delete_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let mut state = self.state()?;
        let mut next = state.clone();
        let removed = next.events.remove(&id);
        if removed.is_some() {
            self.commit(&mut state, next)?;
        }
        Ok(removed)
    }

    async fn set_pinned(&self, id: EventId, pinned: bool) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let mut next = state.clone();
        let Some(event) = next.events.get_mut(&id) else {
            return Err(StoreError::NotFound(id));
        };
        event.is_pinned = pinned;
        self.commit(&mut state, next)
    }

    async fn pinned_count(&self) -> Result<usize, StoreError> {
        let state = self.state()?;
        Ok(state.events.values().filter(|event| event.is_pinned).count())
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut state = self.state()?;
        let mut next = state.clone();
        let mut changed = 0;
        for event in next.events.values_mut() {
            if event.is_active && !event.is_upcoming(now) {
                event.is_active = false;
                changed += 1;
            }
        }
        if changed > 0 {
            self.commit(&mut state, next)?;
        }
        Ok(changed)
    }
}
