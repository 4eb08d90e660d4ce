//! Field validation helpers shared by every request boundary.
//!
//! Messages always name the offending field and the violated constraint.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Prefix the message with the context it was raised in.
    pub fn context(self, prefix: &str) -> Self {
        Self(format!("{}: {}", prefix, self.0))
    }
}

pub type ValidationResult = Result<(), ValidationError>;

pub fn non_negative(field: &str, value: Option<i64>) -> ValidationResult {
    match value {
        Some(v) if v < 0 => Err(ValidationError(format!(
            "negative value validation error: \"{}\" {} invalid, should not be negative number",
            field, v
        ))),
        _ => Ok(()),
    }
}

pub fn positive(field: &str, value: Option<i64>) -> ValidationResult {
    match value {
        Some(v) if v <= 0 => Err(ValidationError(format!(
            "\"{}\" {} invalid, should be positive number",
            field, v
        ))),
        _ => Ok(()),
    }
}

/// Fails when a mandatory reference or path is missing.
pub fn required(field: &str, value: Option<&str>) -> ValidationResult {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(ValidationError(format!("\"{}\" required", field))),
    }
}

/// Fails when an identifying name is blank.
pub fn not_empty(field: &str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError(format!(
            "empty field validation error: \"{}\" required",
            field
        )));
    }
    Ok(())
}

pub fn port(value: i64) -> ValidationResult {
    if !(1..=65535).contains(&value) {
        return Err(ValidationError(format!(
            "port number {} invalid: must be between 1 and 65535",
            value
        )));
    }
    Ok(())
}

/// Inclusive time window in epoch millis, either side optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeBounds {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl TimeBounds {
    pub fn new(from: Option<i64>, to: Option<i64>) -> Result<Self, ValidationError> {
        non_negative("from", from)?;
        non_negative("to", to)?;
        if let (Some(from), Some(to)) = (from, to) {
            if from >= to {
                return Err(ValidationError::new("fromTime should be less than toTime"));
            }
        }
        Ok(Self { from, to })
    }

    pub fn contains(&self, millis: i64) -> bool {
        self.from.map_or(true, |from| millis >= from) && self.to.map_or(true, |to| millis <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_negative_message_names_field() {
        let err = non_negative("bandwidth", Some(-1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "negative value validation error: \"bandwidth\" -1 invalid, should not be negative number"
        );
        assert!(non_negative("bandwidth", Some(0)).is_ok());
        assert!(non_negative("bandwidth", None).is_ok());
    }

    #[test]
    fn test_positive_rejects_zero() {
        let err = positive("parallel", Some(0)).unwrap_err();
        assert_eq!(err.to_string(), "\"parallel\" 0 invalid, should be positive number");
        assert!(positive("parallel", Some(1)).is_ok());
    }

    #[test]
    fn test_required_and_not_empty() {
        assert_eq!(
            required("backup-data-path", None).unwrap_err().to_string(),
            "\"backup-data-path\" required"
        );
        assert_eq!(
            not_empty("hostname", " ").unwrap_err().to_string(),
            "empty field validation error: \"hostname\" required"
        );
    }

    #[test]
    fn test_port_range() {
        assert_eq!(
            port(0).unwrap_err().to_string(),
            "port number 0 invalid: must be between 1 and 65535"
        );
        assert!(port(3000).is_ok());
        assert!(port(65536).is_err());
    }

    #[test]
    fn test_time_bounds() {
        let err = TimeBounds::new(Some(5), Some(5)).unwrap_err();
        assert_eq!(err.to_string(), "fromTime should be less than toTime");

        let err = TimeBounds::new(Some(-1), None)
            .unwrap_err()
            .context("invalid query param time bounds");
        assert_eq!(
            err.to_string(),
            "invalid query param time bounds: negative value validation error: \"from\" -1 invalid, should not be negative number"
        );

        let bounds = TimeBounds::new(Some(10), Some(20)).unwrap();
        assert!(bounds.contains(10));
        assert!(bounds.contains(20));
        assert!(!bounds.contains(21));
        assert!(TimeBounds::default().contains(0));
    }
}
