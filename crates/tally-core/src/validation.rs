use crate::error::ValidationError;
use crate::types::{Priority, TaskSource};

pub fn validate_identity(source: &TaskSource, original_id: &str) -> Result<(), ValidationError> {
    if source.is_empty() || original_id.trim().is_empty() {
        return Err(ValidationError::MissingIdentity);
    }
    Ok(())
}

/// Parses an optional priority value; empty or absent means "clear".
pub fn parse_priority(value: Option<&str>) -> Result<Option<Priority>, ValidationError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text.parse().map(Some),
    }
}
