use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::Preferences;
use crate::countdown::{format_countdown, progress, remaining, time_until};
use crate::event::model::{Event, EventId};
use crate::reminder::token::ReminderLabel;

pub const PLACEHOLDER_TITLE: &str = "Loading events...";

const REALTIME_REFRESH: Duration = Duration::from_secs(1);
const MINUTE_REFRESH: Duration = Duration::from_secs(60);
const HOURLY_REFRESH: Duration = Duration::from_secs(3_600);

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReminderNotification {
    pub event_id: EventId,
    pub title: String,
    pub label: ReminderLabel,
    pub message: String,
}

impl ReminderNotification {
    pub fn new(event: &Event, label: ReminderLabel) -> Self {
        Self {
            event_id: event.id,
            title: event.title.clone(),
            label,
            message: label.message(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SummaryLine {
    pub event_id: EventId,
    pub title: String,
    pub countdown: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistentContent {
    pub event_id: Option<EventId>,
    pub title: String,
    pub countdown: String,
    pub time_until: String,
    pub progress: f64,
    pub summary: Vec<SummaryLine>,
}

impl PersistentContent {
    pub fn placeholder() -> Self {
        Self {
            event_id: None,
            title: PLACEHOLDER_TITLE.to_string(),
            countdown: String::new(),
            time_until: String::new(),
            progress: 0.0,
            summary: Vec::new(),
        }
    }

    pub fn render(
        selected: &Event,
        events: &[Event],
        preferences: &Preferences,
        now: DateTime<Utc>,
    ) -> Self {
        let time = remaining(now, selected.target);
        Self {
            event_id: Some(selected.id),
            title: selected.title.clone(),
            countdown: format_countdown(&time),
            time_until: time_until(&time),
            progress: progress(selected.created, selected.target, now),
            summary: summary_lines(events, preferences, now),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.event_id.is_none()
    }
}

/// Upcoming events, pinned first then soonest, when the multi-event style is
/// enabled and there is more than one to show.
fn summary_lines(events: &[Event], preferences: &Preferences, now: DateTime<Utc>) -> Vec<SummaryLine> {
    if !preferences.multiple_events_notification {
        return Vec::new();
    }

    let mut upcoming = events
        .iter()
        .filter(|event| event.is_upcoming(now))
        .collect::<Vec<_>>();
    if upcoming.len() < 2 {
        return Vec::new();
    }
    upcoming.sort_by_key(|event| (!event.is_pinned, event.target));

    upcoming
        .into_iter()
        .take(preferences.max_events_in_notification)
        .map(|event| SummaryLine {
            event_id: event.id,
            title: event.title.clone(),
            countdown: format_countdown(&remaining(now, event.target)),
        })
        .collect()
}

pub fn select_event_to_show(events: &[Event], now: DateTime<Utc>) -> Option<&Event> {
    let upcoming = || events.iter().filter(|event| event.is_upcoming(now));
    upcoming()
        .filter(|event| event.is_pinned)
        .min_by_key(|event| event.target)
        .or_else(|| upcoming().min_by_key(|event| event.target))
}

pub fn refresh_interval(remaining: chrono::Duration) -> Duration {
    if remaining <= chrono::Duration::minutes(5) {
        REALTIME_REFRESH
    } else if remaining <= chrono::Duration::hours(1) {
        MINUTE_REFRESH
    } else {
        HOURLY_REFRESH
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::test_support::{base_time, event_at};

    #[test]
    fn pinned_event_wins_over_sooner_unpinned() {
        let now = base_time();
        let mut a = event_at(1, now + ChronoDuration::days(10));
        a.is_pinned = true;
        let b = event_at(2, now + ChronoDuration::days(1));
        let events = vec![b, a];

        let selected = select_event_to_show(&events, now).expect("selected");
        assert_eq!(selected.id, EventId(1));
    }

    #[test]
    fn soonest_event_wins_without_pins() {
        let now = base_time();
        let c = event_at(3, now + ChronoDuration::hours(3));
        let d = event_at(4, now + ChronoDuration::hours(1));
        let events = vec![c, d];

        let selected = select_event_to_show(&events, now).expect("selected");
        assert_eq!(selected.id, EventId(4));
    }

    #[test]
    fn expired_pinned_events_are_ignored() {
        let now = base_time();
        let mut past = event_at(1, now);
        past.is_pinned = true;
        let future = event_at(2, now + ChronoDuration::hours(2));
        let events = vec![past.clone(), future];
        assert_eq!(
            select_event_to_show(&events, now).map(|event| event.id),
            Some(EventId(2))
        );
        assert!(select_event_to_show(&[past], now).is_none());
    }

    #[test]
    fn refresh_cadence_follows_urgency() {
        assert_eq!(refresh_interval(ChronoDuration::seconds(-5)), Duration::from_secs(1));
        assert_eq!(refresh_interval(ChronoDuration::zero()), Duration::from_secs(1));
        assert_eq!(refresh_interval(ChronoDuration::seconds(30)), Duration::from_secs(1));
        assert_eq!(refresh_interval(ChronoDuration::minutes(5)), Duration::from_secs(1));
        assert_eq!(refresh_interval(ChronoDuration::minutes(30)), Duration::from_secs(60));
        assert_eq!(refresh_interval(ChronoDuration::hours(1)), Duration::from_secs(60));
        assert_eq!(
            refresh_interval(ChronoDuration::hours(1) + ChronoDuration::seconds(1)),
            Duration::from_secs(3_600)
        );
    }

    #[test]
    fn summary_lists_pinned_first_and_respects_the_limit() {
        let now = base_time();
        let mut pinned = event_at(1, now + ChronoDuration::days(9));
        pinned.is_pinned = true;
        let events = vec![
            event_at(2, now + ChronoDuration::hours(1)),
            pinned,
            event_at(3, now + ChronoDuration::hours(2)),
            event_at(4, now + ChronoDuration::hours(3)),
            event_at(5, now - ChronoDuration::hours(3)),
        ];
        let preferences = Preferences {
            multiple_events_notification: true,
            max_events_in_notification: 3,
            ..Preferences::default()
        };

        let selected = select_event_to_show(&events, now).expect("selected");
        let content = PersistentContent::render(selected, &events, &preferences, now);
        assert_eq!(content.event_id, Some(EventId(1)));
        assert_eq!(
            content
                .summary
                .iter()
                .map(|line| line.event_id)
                .collect::<Vec<_>>(),
            vec![EventId(1), EventId(2), EventId(3)]
        );
        assert_eq!(content.summary[1].countdown, "0d 1h 0m 0s");
    }

    #[test]
    fn single_event_style_has_no_summary() {
        let now = base_time();
        let events = vec![
            event_at(1, now + ChronoDuration::hours(1)),
            event_at(2, now + ChronoDuration::hours(2)),
        ];
        let content =
            PersistentContent::render(&events[0], &events, &Preferences::default(), now);
        assert!(content.summary.is_empty());
        assert_eq!(content.time_until, "1 hours");
        assert!(!content.is_placeholder());
        assert!(PersistentContent::placeholder().is_placeholder());
    }
}
