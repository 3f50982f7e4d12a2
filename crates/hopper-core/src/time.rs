//! Time utilities for hopper

use std::time::{SystemTime, UNIX_EPOCH};

const MINUTE_MS: u64 = 60_000;

/// Get the current Unix timestamp in milliseconds.
///
/// A clock set before the Unix epoch reads as 0.
///
/// # Examples
/// ```
/// use hopper_core::time::current_time_millis;
///
/// let now = current_time_millis();
/// assert!(now > 0);
/// ```
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Short relative age of a millisecond timestamp: `now`, `3m`, `4h`, `2d`, `1w`
pub fn format_age(timestamp_ms: u64) -> String {
    format_age_at(timestamp_ms, current_time_millis())
}

/// [`format_age`] against an explicit clock reading
pub fn format_age_at(timestamp_ms: u64, now_ms: u64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    if diff < MINUTE_MS {
        return "now".to_string();
    }

    let minutes = diff / MINUTE_MS;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 7 {
        return format!("{}d", days);
    }

    format!("{}w", days / 7)
}
