use chrono::{DateTime, Utc};

const MS_PER_SECOND: i64 = 1_000;
const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 3_600;
const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct CountdownTime {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    pub is_expired: bool,
}

impl CountdownTime {
    pub fn expired() -> Self {
        Self {
            is_expired: true,
            ..Self::default()
        }
    }
}

/// Truncating breakdown of `target - now`. Expired exactly when `target <= now`.
pub fn remaining(now: DateTime<Utc>, target: DateTime<Utc>) -> CountdownTime {
    if target <= now {
        return CountdownTime::expired();
    }

    let total_ms = (target - now).num_milliseconds().max(0);
    let total_seconds = (total_ms / MS_PER_SECOND) as u64;
    CountdownTime {
        days: total_seconds / SECONDS_PER_DAY,
        hours: (total_seconds / SECONDS_PER_HOUR) % 24,
        minutes: (total_seconds / SECONDS_PER_MINUTE) % 60,
        seconds: total_seconds % 60,
        is_expired: false,
    }
}

pub fn format_countdown(time: &CountdownTime) -> String {
    if time.is_expired {
        return "Event has ended!".to_string();
    }
    format!(
        "{}d {}h {}m {}s",
        time.days, time.hours, time.minutes, time.seconds
    )
}

pub fn time_until(time: &CountdownTime) -> String {
    if time.is_expired {
        "Ended".to_string()
    } else if time.days > 0 {
        format!("{} days", time.days)
    } else if time.hours > 0 {
        format!("{} hours", time.hours)
    } else if time.minutes > 0 {
        format!("{} minutes", time.minutes)
    } else {
        format!("{} seconds", time.seconds)
    }
}

/// Elapsed fraction of the span `created..target`, clamped to `[0, 1]`.
pub fn progress(created: DateTime<Utc>, target: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let total_ms = (target - created).num_milliseconds();
    if total_ms <= 0 {
        return 1.0;
    }
    let elapsed_ms = (now - created).num_milliseconds();
    (elapsed_ms as f64 / total_ms as f64).clamp(0.0, 1.0)
}
