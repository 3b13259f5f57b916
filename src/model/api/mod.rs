//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings.
//! - Datetimes are serialised as RFC 3339 strings.

use crate::error::{Error, Result};

pub mod auth;
pub mod id;
pub mod round;
pub mod session;
pub mod state;

/// Trim `value` and check it holds between 1 and `max` characters.
pub(crate) fn validated_text(field: &str, value: &str, max: usize) -> Result<String> {
    let value = value.trim();
    let len = value.chars().count();
    if len == 0 || len > max {
        return Err(Error::Validation(format!(
            "{field} must be between 1 and {max} characters"
        )));
    }
    Ok(value.to_string())
}
