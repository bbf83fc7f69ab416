use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

pub const DEFAULT_MAX_EVENTS_IN_NOTIFICATION: usize = 3;
pub const MAX_EVENTS_IN_NOTIFICATION_RANGE: RangeInclusive<usize> = 1..=10;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Preferences {
    pub notifications_enabled: bool,
    pub multiple_events_notification: bool,
    pub max_events_in_notification: usize,
    pub auto_delete_expired: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            notifications_enabled: false,
            multiple_events_notification: false,
            max_events_in_notification: DEFAULT_MAX_EVENTS_IN_NOTIFICATION,
            auto_delete_expired: false,
        }
    }
}

pub trait PreferenceStore: Send + Sync {
    fn load(&self) -> Preferences;
    fn save(&self, preferences: &Preferences) -> Result<()>;
}

/// Copy of the notifications flag kept apart from the main preferences so it
/// can be read before the user unlocks the device.
pub trait BootFlagStore: Send + Sync {
    /// `None` when the flag was never written.
    fn notifications_enabled(&self) -> Option<bool>;
    fn set_notifications_enabled(&self, enabled: bool) -> Result<()>;
}

pub fn notifications_enabled(preferences: &dyn PreferenceStore, flags: &dyn BootFlagStore) -> bool {
    flags
        .notifications_enabled()
        .unwrap_or_else(|| preferences.load().notifications_enabled)
}

pub fn set_notifications_enabled(
    preferences: &dyn PreferenceStore,
    flags: &dyn BootFlagStore,
    enabled: bool,
) -> Result<()> {
    let mut current = preferences.load();
    current.notifications_enabled = enabled;
    preferences.save(&current)?;
    flags.set_notifications_enabled(enabled)
}

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    current: Mutex<Preferences>,
}

impl MemoryPreferences {
    pub fn new(preferences: Preferences) -> Self {
        Self {
            current: Mutex::new(preferences),
        }
    }
}

impl PreferenceStore for MemoryPreferences {
    fn load(&self) -> Preferences {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, preferences: &Preferences) -> Result<()> {
        validate(preferences)?;
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = preferences.clone();
        Ok(())
    }
}

#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    current: Mutex<Preferences>,
}

impl FilePreferences {
    pub fn open(path: &Path) -> Result<Self> {
        let current = if path.exists() {
            load_preferences(path)?
        } else {
            Preferences::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            current: Mutex::new(current),
        })
    }
}

impl PreferenceStore for FilePreferences {
    fn load(&self) -> Preferences {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, preferences: &Preferences) -> Result<()> {
        validate(preferences)?;
        save_preferences(&self.path, preferences)?;
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = preferences.clone();
        Ok(())
    }
}

pub fn load_preferences(path: &Path) -> Result<Preferences> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read preferences file {}", path.display()))?;
    parse_preferences_text(&content)
}

pub fn parse_preferences_text(content: &str) -> Result<Preferences> {
    let raw = serde_json::from_str::<PreferencesRaw>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    if raw.version != 1 {
        bail!(
            "unsupported preferences file version {}; expected version 1",
            raw.version
        );
    }

    let preferences = Preferences {
        notifications_enabled: raw.notifications_enabled,
        multiple_events_notification: raw.multiple_events_notification,
        max_events_in_notification: raw.max_events_in_notification,
        auto_delete_expired: raw.auto_delete_expired,
    };
    validate(&preferences)?;
    Ok(preferences)
}

pub fn save_preferences(path: &Path, preferences: &Preferences) -> Result<()> {
    let payload = json!({
        "version": 1,
        "notifications_enabled": preferences.notifications_enabled,
        "multiple_events_notification": preferences.multiple_events_notification,
        "max_events_in_notification": preferences.max_events_in_notification,
        "auto_delete_expired": preferences.auto_delete_expired,
    });
    let text = serde_json::to_string_pretty(&payload)?;
    fs::write(path, format!("{text}\n"))
        .with_context(|| format!("unable to write preferences file {}", path.display()))?;
    Ok(())
}

fn validate(preferences: &Preferences) -> Result<()> {
    if !MAX_EVENTS_IN_NOTIFICATION_RANGE.contains(&preferences.max_events_in_notification) {
        bail!(
            "max_events_in_notification must be between {} and {}, got {}",
            MAX_EVENTS_IN_NOTIFICATION_RANGE.start(),
            MAX_EVENTS_IN_NOTIFICATION_RANGE.end(),
            preferences.max_events_in_notification
        );
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct PreferencesRaw {
    version: u32,
    #[serde(default)]
    notifications_enabled: bool,
    #[serde(default)]
    multiple_events_notification: bool,
    #[serde(default = "default_max_events")]
    max_events_in_notification: usize,
    #[serde(default)]
    auto_delete_expired: bool,
}

fn default_max_events() -> usize {
    DEFAULT_MAX_EVENTS_IN_NOTIFICATION
}

#[derive(Debug, Default)]
pub struct MemoryBootFlags {
    enabled: Mutex<Option<bool>>,
}

impl BootFlagStore for MemoryBootFlags {
    fn notifications_enabled(&self) -> Option<bool> {
        *self.enabled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_notifications_enabled(&self, enabled: bool) -> Result<()> {
        *self.enabled.lock().unwrap_or_else(PoisonError::into_inner) = Some(enabled);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileBootFlags {
    path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct BootFlagsRaw {
    notifications_enabled: bool,
}

impl FileBootFlags {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl BootFlagStore for FileBootFlags {
    fn notifications_enabled(&self) -> Option<bool> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %self.path.display(), "unable to read boot flags: {err}");
                return None;
            }
        };
        match serde_json::from_str::<BootFlagsRaw>(&content) {
            Ok(raw) => Some(raw.notifications_enabled),
            Err(err) => {
                warn!(path = %self.path.display(), "ignoring malformed boot flags: {err}");
                None
            }
        }
    }

    fn set_notifications_enabled(&self, enabled: bool) -> Result<()> {
        let text = serde_json::to_string_pretty(&BootFlagsRaw {
            notifications_enabled: enabled,
        })?;
        fs::write(&self.path, format!("{text}\n"))
            .with_context(|| format!("unable to write boot flags {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let preferences = parse_preferences_text(r#"{ "version": 1 }"#).expect("valid");
        assert_eq!(preferences, Preferences::default());
    }

    #[test]
    fn rejects_out_of_range_event_limit() {
        let err = parse_preferences_text(r#"{ "version": 1, "max_events_in_notification": 11 }"#)
            .expect_err("limit");
        assert!(err.to_string().contains("between 1 and 10"));

        let store = MemoryPreferences::default();
        let bad = Preferences {
            max_events_in_notification: 0,
            ..Preferences::default()
        };
        assert!(store.save(&bad).is_err());
        assert_eq!(store.load(), Preferences::default());
    }

    #[test]
    fn rejects_unknown_version() {
        let err = parse_preferences_text(r#"{ "version": 3 }"#).expect_err("version");
        assert!(err.to_string().contains("unsupported preferences file version 3"));
    }

    #[test]
    fn file_preferences_write_through() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        let store = FilePreferences::open(&path).expect("open");
        let updated = Preferences {
            multiple_events_notification: true,
            max_events_in_notification: 5,
            ..Preferences::default()
        };
        store.save(&updated).expect("save");

        let reopened = FilePreferences::open(&path).expect("reopen");
        assert_eq!(reopened.load(), updated);
    }

    #[test]
    fn enabling_writes_both_stores_and_boot_copy_wins() {
        let dir = tempdir().expect("tempdir");
        let preferences = MemoryPreferences::default();
        let flags = FileBootFlags::new(&dir.path().join("boot.json"));
        assert_eq!(flags.notifications_enabled(), None);
        assert!(!notifications_enabled(&preferences, &flags));

        set_notifications_enabled(&preferences, &flags, true).expect("enable");
        assert!(preferences.load().notifications_enabled);
        assert_eq!(flags.notifications_enabled(), Some(true));

        flags.set_notifications_enabled(false).expect("mirror");
        assert!(!notifications_enabled(&preferences, &flags));
    }

    #[test]
    fn malformed_boot_flags_read_as_unset() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("boot.json");
        fs::write(&path, "not json").expect("write");
        assert_eq!(FileBootFlags::new(&path).notifications_enabled(), None);
    }
}
