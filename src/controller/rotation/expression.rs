//! # Rotation Expressions
//!
//! Parses human-readable time expressions into an absolute deadline.
//!
//! Accepted forms (case-insensitive):
//! - relative terms: `30 days`, `24 hours`, `1 week and 2 days`, `an hour`
//! - compact durations: `30d`, `12h`, `90m`
//! - optional wrappers: `in 2 weeks`, `3 months from now`
//! - keywords: `tomorrow`, `next week`, `next month`, `next year`,
//!   `hourly`, `daily`, `weekly`, `monthly`, `yearly`
//! - absolute: RFC 3339 timestamps and `YYYY-MM-DD` (midnight UTC)

use chrono::{DateTime, Months, NaiveDate, TimeDelta, Utc};
use regex::Regex;

/// Expression could not be turned into a deadline
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot parse rotation expression '{expression}': {reason}")]
pub struct RotationExpressionError {
    pub expression: String,
    pub reason: String,
}

/// Turns a time expression into an absolute time relative to `reference`
pub trait TimeExpressionParser: Send + Sync + std::fmt::Debug {
    /// # Errors
    ///
    /// `RotationExpressionError` for unparseable input. Absolute dates that
    /// already passed are returned as-is.
    fn parse(
        &self,
        text: &str,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, RotationExpressionError>;
}

/// Built-in English grammar
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalLanguageParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Delta(TimeDelta),
    Months(u32),
}

impl TimeExpressionParser for NaturalLanguageParser {
    fn parse(
        &self,
        text: &str,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, RotationExpressionError> {
        let error = |reason: &str| RotationExpressionError {
            expression: text.to_string(),
            reason: reason.to_string(),
        };

        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        if normalized.is_empty() {
            return Err(error("expression is empty"));
        }

        if let Some(absolute) = parse_absolute(text.trim()) {
            return Ok(absolute);
        }

        let steps = match keyword(&normalized) {
            Some(step) => vec![step],
            None => relative_steps(&normalized).map_err(|reason| error(&reason))?,
        };
        apply(reference, &steps).ok_or_else(|| error("result is out of range"))
    }
}

fn parse_absolute(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn keyword(text: &str) -> Option<Step> {
    let step = match text {
        "hourly" => Step::Delta(TimeDelta::hours(1)),
        "tomorrow" | "daily" => Step::Delta(TimeDelta::days(1)),
        "next week" | "weekly" => Step::Delta(TimeDelta::weeks(1)),
        "next month" | "monthly" => Step::Months(1),
        "next year" | "yearly" | "annually" => Step::Months(12),
        _ => return None,
    };
    Some(step)
}

fn relative_steps(text: &str) -> Result<Vec<Step>, String> {
    let body = text.strip_prefix("in ").unwrap_or(text);
    let body = body
        .strip_suffix(" from now")
        .or_else(|| body.strip_suffix(" later"))
        .unwrap_or(body);

    let term = Regex::new(r"^(?P<count>\d+|an?|one)\s*(?P<unit>[a-z]+)$")
        .map_err(|e| format!("failed to compile term regex: {e}"))?;
    let separator = Regex::new(r"\s*(?:,|\band\b)\s*")
        .map_err(|e| format!("failed to compile separator regex: {e}"))?;

    let mut steps = Vec::new();
    for part in separator.split(body).filter(|p| !p.is_empty()) {
        let captures = term
            .captures(part)
            .ok_or_else(|| format!("'{part}' is not of the form '<number> <unit>'"))?;

        let count: u32 = match &captures["count"] {
            "a" | "an" | "one" => 1,
            digits => digits
                .parse()
                .map_err(|e| format!("invalid number '{digits}': {e}"))?,
        };
        if count == 0 {
            return Err(format!("'{part}' must be greater than zero"));
        }

        steps.push(unit_step(&captures["unit"], count)?);
    }

    if steps.is_empty() {
        return Err("no time terms found".to_string());
    }
    Ok(steps)
}

fn unit_step(unit: &str, count: u32) -> Result<Step, String> {
    let n = i64::from(count);
    let step = match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Step::Delta(TimeDelta::seconds(n)),
        "m" | "min" | "mins" | "minute" | "minutes" => Step::Delta(TimeDelta::minutes(n)),
        "h" | "hr" | "hrs" | "hour" | "hours" => Step::Delta(TimeDelta::hours(n)),
        "d" | "day" | "days" => Step::Delta(TimeDelta::days(n)),
        "w" | "wk" | "wks" | "week" | "weeks" => Step::Delta(TimeDelta::weeks(n)),
        "mo" | "month" | "months" => Step::Months(count),
        "y" | "yr" | "yrs" | "year" | "years" => {
            Step::Months(count.checked_mul(12).ok_or("year count is too large")?)
        }
        other => return Err(format!("unknown unit '{other}'")),
    };
    Ok(step)
}

fn apply(reference: DateTime<Utc>, steps: &[Step]) -> Option<DateTime<Utc>> {
    steps.iter().try_fold(reference, |at, step| match step {
        Step::Delta(delta) => at.checked_add_signed(*delta),
        Step::Months(months) => at.checked_add_months(Months::new(*months)),
    })
}
