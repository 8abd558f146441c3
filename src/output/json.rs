//! JSON serialization for recovery and survey results.

use serde::Serialize;

/// Serialize a result to a compact JSON string.
///
/// Non-finite scores (an infinite separation, the mean of a candidate
/// without samples) are written as the strings `"inf"`, `"-inf"` or `"NaN"`
/// and read back unchanged.
///
/// # Errors
///
/// Returns an error if serialization fails (should not happen for result types).
pub fn to_json<T: Serialize + ?Sized>(result: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(result)
}

/// Serialize a result to a pretty-printed JSON string.
///
/// # Errors
///
/// Returns an error if serialization fails (should not happen for result types).
pub fn to_json_pretty<T: Serialize + ?Sized>(result: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(result)
}
