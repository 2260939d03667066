//! Go-style duration strings (`"300s"`, `"5m"`, `"1h30m"`, `"500ms"`).
//!
//! Agent specs carry schedule intervals and timeouts as strings so they read
//! naturally in declarative manifests; this module parses them into
//! `std::time::Duration` at the point of use.

use crate::error::{TypesError, TypesResult};
use std::time::Duration;

/// Parse a duration string composed of one or more `<number><unit>` terms.
///
/// Supported units: `ms`, `s`, `m`, `h`, `d`. Terms accumulate, so
/// `"1h30m"` is ninety minutes. A bare number is rejected — the unit is
/// load-bearing in manifests.
pub fn parse_duration(value: &str) -> TypesResult<Duration> {
    let s = value.trim();
    if s.is_empty() {
        return Err(TypesError::InvalidDuration {
            value: value.to_string(),
            reason: "empty".to_string(),
        });
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| TypesError::InvalidDuration {
                value: value.to_string(),
                reason: "missing unit".to_string(),
            })?;
        if digits_end == 0 {
            return Err(TypesError::InvalidDuration {
                value: value.to_string(),
                reason: format!("expected number at {rest:?}"),
            });
        }
        let number: f64 = rest[..digits_end]
            .parse()
            .map_err(|_| TypesError::InvalidDuration {
                value: value.to_string(),
                reason: format!("bad number {:?}", &rest[..digits_end]),
            })?;
        rest = &rest[digits_end..];

        let (unit, after) = if let Some(r) = rest.strip_prefix("ms") {
            ("ms", r)
        } else if let Some(r) = rest.strip_prefix('s') {
            ("s", r)
        } else if let Some(r) = rest.strip_prefix('m') {
            ("m", r)
        } else if let Some(r) = rest.strip_prefix('h') {
            ("h", r)
        } else if let Some(r) = rest.strip_prefix('d') {
            ("d", r)
        } else {
            return Err(TypesError::InvalidDuration {
                value: value.to_string(),
                reason: format!("unknown unit at {rest:?}"),
            });
        };
        rest = after;

        let millis = match unit {
            "ms" => number,
            "s" => number * 1_000.0,
            "m" => number * 60_000.0,
            "h" => number * 3_600_000.0,
            "d" => number * 86_400_000.0,
            _ => unreachable!(),
        };
        total += Duration::from_millis(millis as u64);
    }

    Ok(total)
}

/// Parse a duration, falling back to `default` on empty or malformed input.
pub fn parse_duration_or(value: &str, default: Duration) -> Duration {
    if value.trim().is_empty() {
        return default;
    }
    parse_duration(value).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_duration("300s").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn parses_compound() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn parses_fractional() {
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("m5").is_err());
        assert!(parse_duration("not-a-duration").is_err());
        assert!(parse_duration("5x").is_err());
    }

    #[test]
    fn fallback_on_empty() {
        let d = parse_duration_or("", Duration::from_secs(30));
        assert_eq!(d, Duration::from_secs(30));
    }
}
