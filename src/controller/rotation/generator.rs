//! # Value Generator
//!
//! Generates random secret values from a character-class style pattern.

use rand::rngs::OsRng;
use rand::Rng;
use zeroize::Zeroizing;

/// Upper bound used for unbounded repetitions (`*`, `+`) inside a pattern
const MAX_REPEAT: u32 = 64;

/// Pattern could not be used to generate a value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid pattern '{pattern}': {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: String,
}

/// Generate a value made of `size` consecutive matches of `pattern`
///
/// `generate("[a-f0-9]", 8)` yields e.g. `3fa9c01e`. Values come from the
/// operating system's CSPRNG.
///
/// # Errors
///
/// `PatternError` when the pattern is empty, does not compile, or `size` is 0.
pub fn generate(pattern: &str, size: u32) -> Result<Zeroizing<String>, PatternError> {
    generate_with(&mut OsRng, pattern, size)
}

/// Same as [`generate`] with a caller-supplied random source
///
/// # Errors
///
/// See [`generate`].
pub fn generate_with<R: Rng>(
    rng: &mut R,
    pattern: &str,
    size: u32,
) -> Result<Zeroizing<String>, PatternError> {
    let error = |reason: String| PatternError {
        pattern: pattern.to_string(),
        reason,
    };

    if pattern.trim().is_empty() {
        return Err(error("pattern is empty".to_string()));
    }
    if size == 0 {
        return Err(error("size must be greater than 0".to_string()));
    }

    let sized = format!("(?:{pattern}){{{size}}}");
    let distribution =
        rand_regex::Regex::compile(&sized, MAX_REPEAT).map_err(|e| error(e.to_string()))?;

    Ok(Zeroizing::new(rng.sample::<String, _>(&distribution)))
}
