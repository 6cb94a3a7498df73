//! Per-tenant cron schedule evaluation.
//!
//! Schedules store standard 5-field cron expressions plus an IANA timezone.
//! The `cron` crate parses 6/7-field expressions (with a leading seconds
//! field), so a validated 5-field expression gets `"0 "` prepended before
//! parsing. Weekday/month names (`MON`, `JAN`, …) pass through unchanged.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("cron expression must have 5 fields, got {0}")]
    WrongFieldCount(usize),
    #[error("invalid cron expression \"{expr}\": {reason}")]
    InvalidExpression { expr: String, reason: String },
    #[error("unknown timezone \"{0}\"")]
    UnknownTimezone(String),
}

/// Validates a 5-field cron expression, returning the parsed [`Schedule`].
///
/// # Errors
///
/// Returns [`CronError::WrongFieldCount`] for anything other than 5 fields,
/// or [`CronError::InvalidExpression`] when a field does not parse.
pub fn validate_cron_expr(expr: &str) -> Result<Schedule, CronError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(CronError::WrongFieldCount(fields.len()));
    }
    let with_seconds = format!("0 {}", fields.join(" "));
    Schedule::from_str(&with_seconds).map_err(|e| CronError::InvalidExpression {
        expr: expr.to_owned(),
        reason: e.to_string(),
    })
}

/// Parses an IANA timezone name (e.g. `"Europe/Moscow"`).
///
/// # Errors
///
/// Returns [`CronError::UnknownTimezone`] for names the tz database does not
/// know.
pub fn parse_timezone(tz: &str) -> Result<Tz, CronError> {
    tz.parse::<Tz>()
        .map_err(|_| CronError::UnknownTimezone(tz.to_owned()))
}

/// Computes the next instant strictly after `after` at which the expression
/// fires in the given timezone.
///
/// This is a pure function of `(expr, tz, after)`: advancing a schedule after
/// a skipped tick lands on the same instant an uninterrupted scheduler would
/// have chosen.
///
/// # Errors
///
/// Returns [`CronError`] if the expression does not validate.
pub fn next_occurrence(
    expr: &str,
    tz: Tz,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, CronError> {
    let schedule = validate_cron_expr(expr)?;
    let next = schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|dt| dt.with_timezone(&Utc));
    Ok(next)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn accepts_standard_five_field_expressions() {
        assert!(validate_cron_expr("*/5 * * * *").is_ok());
        assert!(validate_cron_expr("0 2 * * SUN").is_ok());
        assert!(validate_cron_expr("30 4 1 JAN *").is_ok());
    }

    #[test]
    fn rejects_wrong_field_counts() {
        assert!(matches!(
            validate_cron_expr("* * * *"),
            Err(CronError::WrongFieldCount(4))
        ));
        assert!(matches!(
            validate_cron_expr("0 * * * * *"),
            Err(CronError::WrongFieldCount(6))
        ));
    }

    #[test]
    fn rejects_garbage_fields() {
        assert!(matches!(
            validate_cron_expr("61 * * * *"),
            Err(CronError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn unknown_timezone_is_an_error() {
        assert!(matches!(
            parse_timezone("Mars/Olympus"),
            Err(CronError::UnknownTimezone(_))
        ));
        assert!(parse_timezone("Europe/Moscow").is_ok());
    }

    #[test]
    fn next_occurrence_is_pure_and_tz_aware() {
        let tz: Tz = "Europe/Moscow".parse().expect("tz");
        // 2024-03-01 10:15 UTC == 13:15 MSK; daily at 14:00 MSK fires at 11:00 UTC.
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        let next = next_occurrence("0 14 * * *", tz, after)
            .expect("valid expr")
            .expect("has next");
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap());

        // Same inputs, same output.
        let again = next_occurrence("0 14 * * *", tz, after)
            .expect("valid expr")
            .expect("has next");
        assert_eq!(next, again);
    }

    #[test]
    fn next_occurrence_is_strictly_after() {
        let tz: Tz = "UTC".parse().expect("tz");
        let exactly_on_tick = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
        let next = next_occurrence("0 14 * * *", tz, exactly_on_tick)
            .expect("valid expr")
            .expect("has next");
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 2, 14, 0, 0).unwrap());
    }
}
