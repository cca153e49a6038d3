//! Input validation errors shared across model types.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Caller-side input error. Never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Required text field is empty after trimming.
    EmptyField(&'static str),
    /// Variable name is not a lowercase dotted key.
    InvalidVariableName(String),
    /// `select` variables need at least one option.
    MissingSelectOptions,
    /// Value does not fit the declared variable type.
    InvalidValue {
        var_type: &'static str,
        value: String,
        reason: &'static str,
    },
    /// Version text is not `MAJOR.MINOR.PATCH`.
    InvalidVersion(String),
    /// Unique key already taken.
    Duplicate {
        entity: &'static str,
        key: String,
    },
    /// Bulk request carries no items.
    EmptyBatch,
    /// Operation not allowed from the record's current state.
    InvalidState(String),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyField(field) => write!(f, "`{field}` cannot be empty"),
            Self::InvalidVariableName(name) => write!(
                f,
                "invalid variable name `{name}`; expected dotted segments of [a-z0-9_]"
            ),
            Self::MissingSelectOptions => write!(f, "select variables require at least one option"),
            Self::InvalidValue {
                var_type,
                value,
                reason,
            } => write!(f, "invalid {var_type} value `{value}`: {reason}"),
            Self::InvalidVersion(value) => {
                write!(f, "invalid version `{value}`; expected MAJOR.MINOR.PATCH")
            }
            Self::Duplicate { entity, key } => write!(f, "{entity} already exists: {key}"),
            Self::EmptyBatch => write!(f, "batch must contain at least one item"),
            Self::InvalidState(message) => write!(f, "invalid state: {message}"),
        }
    }
}

impl Error for ValidationError {}

/// Returns the trimmed value or an `EmptyField` error.
pub fn require_text<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::{require_text, ValidationError};

    #[test]
    fn require_text_trims_and_rejects_blank() {
        assert_eq!(require_text("actor", "  ana  ").unwrap(), "ana");
        assert_eq!(
            require_text("actor", "   ").unwrap_err(),
            ValidationError::EmptyField("actor")
        );
    }
}
