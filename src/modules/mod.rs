pub mod blogposts;
pub mod committees;
pub mod events;
pub mod executives;
mod media;

use crate::web::{AppError, AppResult};

/// Trims `value` and enforces a non-blank string of at most `max` characters.
pub(crate) fn require_text(value: &str, field: &str, max: usize) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("{field} is required.")));
    }
    check_length(trimmed, field, max)?;
    Ok(trimmed.to_string())
}

/// Trims an optional string; blank values collapse to `None`.
pub(crate) fn optional_text(
    value: Option<&str>,
    field: &str,
    max: usize,
) -> AppResult<Option<String>> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(trimmed) => {
            check_length(trimmed, field, max)?;
            Ok(Some(trimmed.to_string()))
        }
        None => Ok(None),
    }
}

fn check_length(value: &str, field: &str, max: usize) -> AppResult<()> {
    if value.chars().count() > max {
        return Err(AppError::bad_request(format!(
            "{field} must be at most {max} characters."
        )));
    }
    Ok(())
}
