//! Display helpers for conversation lists and message bubbles.

use chrono::{DateTime, Utc};

use crate::constants::{UNKNOWN_INITIALS, UNKNOWN_PEER};

/// Compact age of `at` relative to `now`: `now`, `5m`, `3h`, `2d`, then `Oct 5`.
pub fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(at);
    let mins = elapsed.num_minutes();
    let hours = elapsed.num_hours();
    let days = elapsed.num_days();

    if mins < 1 {
        "now".to_string()
    } else if mins < 60 {
        format!("{mins}m")
    } else if hours < 24 {
        format!("{hours}h")
    } else if days < 7 {
        format!("{days}d")
    } else {
        at.format("%b %-d").to_string()
    }
}

/// Wall-clock time of a message, e.g. `3:07 PM`.
pub fn format_clock(at: DateTime<Utc>) -> String {
    at.format("%-I:%M %p").to_string()
}

/// Two-letter avatar initials taken after the `0x` prefix.
pub fn peer_initials(peer: &str) -> String {
    if peer.is_empty() || peer == UNKNOWN_PEER {
        return UNKNOWN_INITIALS.to_string();
    }
    let body = peer.strip_prefix("0x").unwrap_or(peer);
    let initials: String = body.chars().take(2).collect();
    if initials.is_empty() {
        UNKNOWN_INITIALS.to_string()
    } else {
        initials.to_uppercase()
    }
}

/// Stable avatar colour for a peer label, as a CSS `hsl()` value.
///
/// The hue is a rolling hash over the UTF-16 code units, with the shift
/// wrapping at 32 bits, so it matches the colour web clients show.
pub fn peer_color(peer: &str) -> String {
    let mut hash: i64 = 0;
    for unit in peer.encode_utf16() {
        let shifted = (hash as i32).wrapping_shl(5);
        hash = i64::from(unit) + i64::from(shifted) - hash;
    }
    format!("hsl({}, 60%, 55%)", (hash % 360).abs())
}
