// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Input validation for values that arrive from the network.

use crate::error::AppError;
use regex::Regex;
use std::sync::LazyLock;

const MAX_MEET_NAME_LENGTH: usize = 64;

static MEET_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9 _.\-]+$").expect("meet name pattern is valid"));

/// Validate a meet name taken from the `meetName` query parameter.
///
/// Names are case-sensitive and returned unchanged; a name that is empty
/// once trimmed is rejected.
pub fn validate_meet_name(meet_name: &str) -> Result<&str, AppError> {
    if meet_name.trim().is_empty() {
        return Err(AppError::InvalidMeetName("meetName is required".to_string()));
    }

    if meet_name.chars().count() > MAX_MEET_NAME_LENGTH {
        return Err(AppError::InvalidMeetName(format!(
            "meetName must be at most {MAX_MEET_NAME_LENGTH} characters"
        )));
    }

    if !MEET_NAME_REGEX.is_match(meet_name) {
        return Err(AppError::InvalidMeetName(
            "meetName may only contain letters, digits, spaces, '_', '.' and '-'".to_string(),
        ));
    }

    Ok(meet_name)
}
