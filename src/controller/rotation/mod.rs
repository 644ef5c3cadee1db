//! # Rotation and Generation
//!
//! Pure helpers used by the secret reconciler: random value generation and
//! rotation deadline computation.

mod expression;
mod generator;

pub use expression::{NaturalLanguageParser, RotationExpressionError, TimeExpressionParser};
pub use generator::{generate, generate_with, PatternError};

use chrono::{DateTime, Utc};

/// Next rotation deadline for `expression`, evaluated relative to `now`
///
/// Relative expressions always land after `now`. An absolute date that is
/// not after `now` has already fired, so there is nothing left to schedule
/// and `None` is returned.
///
/// # Errors
///
/// `RotationExpressionError` when the expression cannot be parsed.
pub fn next_rotation(
    parser: &dyn TimeExpressionParser,
    expression: &str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, RotationExpressionError> {
    let at = parser.parse(expression, now)?;
    Ok((at > now).then_some(at))
}
