use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::clock::parse_instant;

pub const DEFAULT_REMINDER_INTERVALS: [u32; 4] = [5, 15, 60, 1440];
pub const DEFAULT_EVENT_COLOR: &str = "#6750A4";
pub const MAX_PINNED_EVENTS: usize = 3;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EventId(pub i64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub description: String,
    pub target: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub is_active: bool,
    pub is_pinned: bool,
    pub has_reminders: bool,
    /// Lead times in minutes before `target`. `None` means the defaults.
    pub reminder_intervals: Option<Vec<u32>>,
    pub color: String,
}

impl Event {
    pub fn intervals(&self) -> &[u32] {
        self.reminder_intervals
            .as_deref()
            .unwrap_or(&DEFAULT_REMINDER_INTERVALS)
    }

    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.target > now
    }
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub description: String,
    pub target: DateTime<Utc>,
    pub is_pinned: bool,
    pub has_reminders: bool,
    pub reminder_intervals: Option<Vec<u32>>,
    pub color: String,
}

impl NewEvent {
    pub fn new(title: impl Into<String>, target: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            target,
            is_pinned: false,
            has_reminders: true,
            reminder_intervals: None,
            color: DEFAULT_EVENT_COLOR.to_string(),
        }
    }
}

pub fn normalize_intervals(values: impl IntoIterator<Item = u32>) -> Vec<u32> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|minutes| *minutes > 0 && seen.insert(*minutes))
        .collect()
}

/// Parses the comma separated form ("5, 15, 60"). Blank input means the defaults;
/// entries that are not positive integers are skipped.
pub fn parse_reminder_intervals(input: &str) -> Option<Vec<u32>> {
    if input.trim().is_empty() {
        return None;
    }
    Some(normalize_intervals(
        input
            .split(',')
            .filter_map(|part| part.trim().parse::<u32>().ok()),
    ))
}

#[derive(Debug, Clone)]
pub struct EventsFile {
    pub next_id: i64,
    pub events: Vec<Event>,
}

pub fn load_events(path: &Path) -> Result<EventsFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read events file {}", path.display()))?;
    parse_events_text(&content)
}

pub fn parse_events_text(content: &str) -> Result<EventsFile> {
    let raw = serde_json::from_str::<EventsFileRaw>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    if raw.version != 1 {
        bail!(
            "unsupported events file version {}; expected version 1",
            raw.version
        );
    }

    let mut ids = HashSet::new();
    let mut events = Vec::with_capacity(raw.events.len());
    for event in raw.events {
        if !ids.insert(event.id) {
            bail!("duplicate event id found: {}", event.id);
        }
        if event.title.trim().is_empty() {
            bail!("event {} must have a non-empty title", event.id);
        }

        let target = parse_instant(&event.target)
            .with_context(|| format!("event {} has an invalid target", event.id))?;
        let created = parse_instant(&event.created)
            .with_context(|| format!("event {} has an invalid created", event.id))?;
        let reminder_intervals = match event.reminder_intervals {
            None => None,
            Some(IntervalsRaw::List(values)) => Some(normalize_intervals(values)),
            Some(IntervalsRaw::Text(text)) => parse_reminder_intervals(&text),
        };

        events.push(Event {
            id: EventId(event.id),
            title: event.title,
            description: event.description,
            target,
            created,
            is_active: event.active,
            is_pinned: event.pinned,
            has_reminders: event.has_reminders,
            reminder_intervals,
            color: event.color,
        });
    }

    let max_id = events.iter().map(|event| event.id.0).max().unwrap_or(0);
    let Some(after_max) = max_id.checked_add(1) else {
        bail!("event id space exhausted");
    };
    let next_id = raw.next_id.unwrap_or(0).max(after_max);

    Ok(EventsFile { next_id, events })
}

pub fn save_events(path: &Path, events: &[Event], next_id: i64) -> Result<()> {
    let mut serialized_events = Vec::with_capacity(events.len());
    for event in events {
        let mut event_obj = Map::new();
        event_obj.insert("id".to_string(), Value::Number(event.id.0.into()));
        event_obj.insert("title".to_string(), Value::String(event.title.clone()));
        event_obj.insert(
            "description".to_string(),
            Value::String(event.description.clone()),
        );
        event_obj.insert(
            "target".to_string(),
            Value::String(event.target.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        event_obj.insert(
            "created".to_string(),
            Value::String(event.created.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        event_obj.insert("active".to_string(), Value::Bool(event.is_active));
        event_obj.insert("pinned".to_string(), Value::Bool(event.is_pinned));
        event_obj.insert("has_reminders".to_string(), Value::Bool(event.has_reminders));
        if let Some(intervals) = &event.reminder_intervals {
            event_obj.insert("reminder_intervals".to_string(), json!(intervals));
        }
        event_obj.insert("color".to_string(), Value::String(event.color.clone()));
        serialized_events.push(Value::Object(event_obj));
    }

    let payload = json!({
        "version": 1,
        "next_id": next_id,
        "events": serialized_events,
    });
    let text = serde_json::to_string_pretty(&payload)?;
    fs::write(path, format!("{text}\n"))
        .with_context(|| format!("unable to write events file {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct EventsFileRaw {
    version: u32,
    #[serde(default)]
    next_id: Option<i64>,
    #[serde(default)]
    events: Vec<EventRaw>,
}

#[derive(Debug, Deserialize)]
struct EventRaw {
    id: i64,
    title: String,
    #[serde(default)]
    description: String,
    target: String,
    created: String,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default)]
    pinned: bool,
    #[serde(default = "default_true")]
    has_reminders: bool,
    #[serde(default)]
    reminder_intervals: Option<IntervalsRaw>,
    #[serde(default = "default_color")]
    color: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IntervalsRaw {
    List(Vec<u32>),
    Text(String),
}

fn default_true() -> bool {
    true
}

fn default_color() -> String {
    DEFAULT_EVENT_COLOR.to_string()
}
