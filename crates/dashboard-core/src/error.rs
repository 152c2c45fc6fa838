use std::fmt;

/// A rejected user input, reported next to the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new<M: Into<String>>(field: &'static str, message: M) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Field-level message for an error that came out of a mutation, if it was a
/// validation failure rather than a backend one.
pub fn validation_of(err: &anyhow::Error) -> Option<&ValidationError> {
    err.downcast_ref::<ValidationError>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_survives_anyhow_wrapping() {
        let err = anyhow::Error::new(ValidationError::new("title", "Title is required"));
        let found = validation_of(&err).expect("validation error");
        assert_eq!(found.field, "title");
        assert_eq!(err.to_string(), "title: Title is required");
    }

    #[test]
    fn other_errors_are_not_validation() {
        let err = anyhow::anyhow!("backend unavailable");
        assert!(validation_of(&err).is_none());
    }
}
