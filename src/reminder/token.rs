use std::fmt;

use sha2::{Digest, Sha256};

use crate::event::model::EventId;

const TOKEN_DOMAIN: &[u8] = b"ora.reminder.v1";
const TAG_LEAD: u8 = 0x01;
const TAG_EVENT_REACHED: u8 = 0x02;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ReminderLabel {
    Lead { minutes: u32 },
    EventReached,
}

impl ReminderLabel {
    pub fn lead(minutes: u32) -> Self {
        Self::Lead { minutes }
    }

    pub fn short_text(&self) -> String {
        match *self {
            Self::Lead { minutes } => format_lead_minutes(minutes),
            Self::EventReached => "now".to_string(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Lead { .. } => format!("🎯 Almost there - {} countdown!", self.short_text()),
            Self::EventReached => "⏰ Time's up! Your event is here!".to_string(),
        }
    }
}

impl fmt::Display for ReminderLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lead { .. } => write!(f, "{} before", self.short_text()),
            Self::EventReached => f.write_str("event reached"),
        }
    }
}

fn format_lead_minutes(minutes: u32) -> String {
    match minutes {
        0..60 => format!("{minutes}m"),
        60..1_440 => format!("{}h", minutes / 60),
        1_440..10_080 => format!("{}d", minutes / 1_440),
        10_080..43_200 => format!("{}w", minutes / 10_080),
        43_200..525_600 => format!("{}mo", minutes / 43_200),
        _ => format!("{}y", minutes / 525_600),
    }
}

/// Alarm identity for one `(event, label)` pair.
///
/// The value is the first eight bytes (big endian) of
/// `SHA-256("ora.reminder.v1" || event_id as i64 BE || tag || minutes as u32 BE)`
/// where `tag` is `0x01` for a lead reminder and `0x02` for the event-reached
/// reminder (minutes `0`). Changing this encoding orphans every registered alarm.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ReminderToken(u64);

impl ReminderToken {
    pub fn derive(event_id: EventId, label: ReminderLabel) -> Self {
        let (tag, minutes) = match label {
            ReminderLabel::Lead { minutes } => (TAG_LEAD, minutes),
            ReminderLabel::EventReached => (TAG_EVENT_REACHED, 0),
        };

        let mut hasher = Sha256::new();
        hasher.update(TOKEN_DOMAIN);
        hasher.update(event_id.0.to_be_bytes());
        hasher.update([tag]);
        hasher.update(minutes.to_be_bytes());
        let digest = hasher.finalize();

        let mut prefix = [0_u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(prefix))
    }
}

impl fmt::Display for ReminderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
