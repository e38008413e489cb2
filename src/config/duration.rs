//! Prometheus-style durations (`30s`, `5m`, `3h`, `1w`, `1h30m`, `500ms`)

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

const MS_PER_SECOND: u128 = 1_000;
const MS_PER_MINUTE: u128 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u128 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u128 = 24 * MS_PER_HOUR;
const MS_PER_WEEK: u128 = 7 * MS_PER_DAY;
const MS_PER_YEAR: u128 = 365 * MS_PER_DAY;

static PROMETHEUS_DURATION_REGEX: OnceLock<Regex> = OnceLock::new();

fn prometheus_duration_regex() -> &'static Regex {
    PROMETHEUS_DURATION_REGEX.get_or_init(|| {
        Regex::new(r"^(?:(\d+)y)?(?:(\d+)w)?(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?(?:(\d+)ms)?$")
            .unwrap_or_else(|_| unreachable!())
    })
}

/// Parse a duration string.
///
/// The Prometheus unit syntax is tried first. Human-readable forms such as
/// `"2 minutes"` are accepted as a fallback.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DurationError::Empty);
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    if let Some(duration) = parse_prometheus(input)? {
        return Ok(duration);
    }

    humantime::parse_duration(input).map_err(|e| DurationError::Invalid {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

fn parse_prometheus(input: &str) -> Result<Option<Duration>, DurationError> {
    let Some(captures) = prometheus_duration_regex().captures(input) else {
        return Ok(None);
    };

    let multipliers = [
        MS_PER_YEAR,
        MS_PER_WEEK,
        MS_PER_DAY,
        MS_PER_HOUR,
        MS_PER_MINUTE,
        MS_PER_SECOND,
        1,
    ];

    let mut total: u128 = 0;
    for (i, mult) in multipliers.iter().enumerate() {
        if let Some(m) = captures.get(i + 1) {
            let value: u128 = m.as_str().parse().map_err(|_| DurationError::Overflow {
                input: input.to_string(),
            })?;
            total = value
                .checked_mul(*mult)
                .and_then(|v| total.checked_add(v))
                .ok_or_else(|| DurationError::Overflow {
                    input: input.to_string(),
                })?;
        }
    }

    let millis = u64::try_from(total).map_err(|_| DurationError::Overflow {
        input: input.to_string(),
    })?;
    Ok(Some(Duration::from_millis(millis)))
}

/// Format a duration in canonical Prometheus form.
///
/// Years and weeks are only used when they divide the remainder exactly, so
/// `1w` stays `1w` and `8d` stays `8d`. Sub-millisecond precision is dropped.
pub fn format_duration(duration: Duration) -> String {
    let mut ms = duration.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    let mut take = |unit: &str, mult: u128, exact: bool| {
        if exact && ms % mult != 0 {
            return;
        }
        let v = ms / mult;
        if v > 0 {
            out.push_str(&format!("{}{}", v, unit));
            ms -= v * mult;
        }
    };

    take("y", MS_PER_YEAR, true);
    take("w", MS_PER_WEEK, true);
    take("d", MS_PER_DAY, false);
    take("h", MS_PER_HOUR, false);
    take("m", MS_PER_MINUTE, false);
    take("s", MS_PER_SECOND, false);
    take("ms", 1, false);

    out
}

/// Duration parse errors
#[derive(Debug, thiserror::Error)]
pub enum DurationError {
    #[error("empty duration string")]
    Empty,

    #[error("invalid duration '{input}': {reason}")]
    Invalid { input: String, reason: String },

    #[error("duration '{input}' is out of range")]
    Overflow { input: String },
}

/// Serde adapter for `Duration` fields written as Prometheus duration strings
pub mod serde_duration {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(D::Error::custom)
    }
}
