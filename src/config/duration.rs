//! Duration parsing utilities.

use anyhow::Context;
use std::time::Duration;

/// Parse a duration string like "1h", "30m", "300s", "300" into seconds.
/// Supports:
/// - Plain numbers (interpreted as seconds): "300"
/// - Seconds suffix: "300s"
/// - Minutes suffix: "30m"
/// - Hours suffix: "1h"
pub fn parse_duration_to_secs(s: &str) -> anyhow::Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    let (num_str, unit_secs, unit) = if let Some(num_str) = s.strip_suffix('h') {
        (num_str, 3600, "hours")
    } else if let Some(num_str) = s.strip_suffix('m') {
        (num_str, 60, "minutes")
    } else if let Some(num_str) = s.strip_suffix('s') {
        (num_str, 1, "seconds")
    } else {
        (s, 1, "duration")
    };

    let value: u64 = num_str
        .parse()
        .with_context(|| format!("Invalid {unit} value: {num_str}"))?;
    value
        .checked_mul(unit_secs)
        .with_context(|| format!("Duration too large: {s}"))
}

/// [`parse_duration_to_secs`] as a [`Duration`].
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    parse_duration_to_secs(s).map(Duration::from_secs)
}
