/// Cron parsing and next-occurrence math
///
/// Accepts classic 5-field expressions (minute-first) as well as the 6/7
/// field form the `cron` crate parses natively; 5-field inputs are
/// normalized by prefixing a `0` seconds field. Timezones are IANA names
/// resolved through chrono-tz, defaulting to UTC.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// Parse a cron expression, normalizing 5-field inputs.
pub fn parse(expression: &str) -> Result<cron::Schedule> {
    let normalized = normalize(expression);
    cron::Schedule::from_str(&normalized).map_err(|e| EngineError::InvalidCronExpression {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

/// Resolve an IANA timezone name; None and empty default to UTC.
pub fn parse_timezone(timezone: Option<&str>) -> Result<Tz> {
    match timezone {
        None | Some("") => Ok(chrono_tz::UTC),
        Some(name) => name
            .parse()
            .map_err(|_| EngineError::Validation(format!("unknown timezone '{name}'"))),
    }
}

/// First occurrence strictly after `after`, evaluated in the given timezone
/// and returned in UTC.
pub fn next_occurrence(
    expression: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let schedule = parse(expression)?;
    let tz = parse_timezone(Some(timezone).filter(|s| !s.is_empty()))?;
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| EngineError::InvalidCronExpression {
            expression: expression.to_string(),
            message: "expression has no future occurrence".to_string(),
        })
}

fn normalize(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expression.trim())
    } else {
        expression.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expression_is_accepted() {
        assert!(parse("*/5 * * * *").is_ok());
        assert!(parse("0 9 * * 1").is_ok());
    }

    #[test]
    fn six_field_expression_is_accepted() {
        assert!(parse("0 */5 * * * *").is_ok());
    }

    #[test]
    fn bad_syntax_is_invalid_cron_expression() {
        assert!(matches!(
            parse("not a cron"),
            Err(EngineError::InvalidCronExpression { .. })
        ));
        assert!(matches!(
            parse("61 * * * *"),
            Err(EngineError::InvalidCronExpression { .. })
        ));
    }

    #[test]
    fn next_occurrence_is_strictly_after_now() {
        let now = Utc::now();
        let next = next_occurrence("* * * * *", "UTC", now).unwrap();
        assert!(next > now);
        // Every-minute cadence: at most 60s ahead.
        assert!((next - now).num_seconds() <= 60);
    }

    #[test]
    fn next_occurrence_matches_known_instant() {
        let after = Utc.with_ymd_and_hms(2026, 8, 29, 10, 30, 0).unwrap();
        let next = next_occurrence("0 12 * * *", "UTC", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 29, 12, 0, 0).unwrap());
    }

    #[test]
    fn timezone_shifts_the_occurrence() {
        // Daily at noon Berlin time (CEST, UTC+2 on this date) is 10:00 UTC.
        let after = Utc.with_ymd_and_hms(2026, 8, 29, 1, 0, 0).unwrap();
        let next = next_occurrence("0 12 * * *", "Europe/Berlin", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 29, 10, 0, 0).unwrap());
    }

    #[test]
    fn unknown_timezone_is_a_validation_error() {
        assert!(matches!(
            parse_timezone(Some("Mars/Olympus")),
            Err(EngineError::Validation(_))
        ));
    }
}
