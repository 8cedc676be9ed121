use serde::{Deserialize, Serialize};

/// A single constraint violation reported by a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Name of the offending field, or empty for message-level errors.
    pub field: String,
    /// Human-readable description of the violation.
    pub message: String,
}

impl FieldError {
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a message before its handler runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValidationResult {
    /// The message satisfies all constraints.
    #[default]
    Valid,
    /// The message violates one or more constraints.
    Invalid {
        errors: Vec<FieldError>,
    },
}

impl ValidationResult {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Combines two results, concatenating their errors.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Valid, Self::Valid) => Self::Valid,
            (Self::Invalid { errors }, Self::Valid) | (Self::Valid, Self::Invalid { errors }) => {
                Self::Invalid { errors }
            }
            (Self::Invalid { mut errors }, Self::Invalid { errors: more }) => {
                errors.extend(more);
                Self::Invalid { errors }
            }
        }
    }

    #[must_use]
    pub fn errors(&self) -> &[FieldError] {
        match self {
            Self::Valid => &[],
            Self::Invalid { errors } => errors,
        }
    }
}

impl From<Vec<FieldError>> for ValidationResult {
    fn from(errors: Vec<FieldError>) -> Self {
        if errors.is_empty() {
            Self::Valid
        } else {
            Self::Invalid { errors }
        }
    }
}
