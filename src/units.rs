//! Time unit conversion for limiter parameters.

use crate::error::{RateLimitError, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Unit in which a window or refill interval is expressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum TimeUnit {
    #[default]
    #[serde(rename = "ms")]
    Milliseconds,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
}

impl TimeUnit {
    /// Number of milliseconds in one unit.
    pub fn millis(self) -> u64 {
        match self {
            TimeUnit::Milliseconds => 1,
            TimeUnit::Seconds => 1_000,
            TimeUnit::Minutes => 60 * 1_000,
            TimeUnit::Hours => 60 * 60 * 1_000,
            TimeUnit::Days => 24 * 60 * 60 * 1_000,
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "m",
            TimeUnit::Hours => "h",
            TimeUnit::Days => "d",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for TimeUnit {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "ms" => Ok(TimeUnit::Milliseconds),
            "s" => Ok(TimeUnit::Seconds),
            "m" => Ok(TimeUnit::Minutes),
            "h" => Ok(TimeUnit::Hours),
            "d" => Ok(TimeUnit::Days),
            other => Err(RateLimitError::configuration(format!(
                "Unsupported time unit '{}'. Must be one of: ms, s, m, h, d",
                other
            ))),
        }
    }
}

/// Converts `value` expressed in `unit` into milliseconds.
pub fn to_millis(value: u64, unit: TimeUnit) -> Result<u64> {
    value.checked_mul(unit.millis()).ok_or_else(|| {
        RateLimitError::configuration(format!("{}{} overflows a millisecond count", value, unit))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_millis() {
        assert_eq!(to_millis(1, TimeUnit::Milliseconds).unwrap(), 1);
        assert_eq!(to_millis(1, TimeUnit::Seconds).unwrap(), 1_000);
        assert_eq!(to_millis(1, TimeUnit::Minutes).unwrap(), 60_000);
        assert_eq!(to_millis(1, TimeUnit::Hours).unwrap(), 3_600_000);
        assert_eq!(to_millis(1, TimeUnit::Days).unwrap(), 86_400_000);
        assert_eq!(to_millis(7, TimeUnit::Seconds).unwrap(), 7_000);
    }

    #[test]
    fn test_overflow_is_configuration_error() {
        let err = to_millis(u64::MAX, TimeUnit::Days).unwrap_err();
        assert!(matches!(err, RateLimitError::Configuration(_)));
    }

    #[test]
    fn test_parse_short_names() {
        assert_eq!("ms".parse::<TimeUnit>().unwrap(), TimeUnit::Milliseconds);
        assert_eq!(" s ".parse::<TimeUnit>().unwrap(), TimeUnit::Seconds);
        assert_eq!("d".parse::<TimeUnit>().unwrap(), TimeUnit::Days);
        assert!("weeks".parse::<TimeUnit>().is_err());
    }

    #[test]
    fn test_deserialize() {
        let unit: TimeUnit = serde_json::from_str("\"h\"").unwrap();
        assert_eq!(unit, TimeUnit::Hours);
    }
}
