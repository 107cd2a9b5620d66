// src/utils/validation.rs
use crate::errors::{PoolmateError, ValidationError};

/// Collects field errors so a caller sees every problem in one response.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.fail(field, "is required");
        }
        self
    }

    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        let value = value.trim();
        let valid = value
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !valid {
            self.fail(field, "must be a valid email address");
        }
        self
    }

    pub fn non_negative(&mut self, field: &str, value: Option<f64>) -> &mut Self {
        if let Some(value) = value {
            if !value.is_finite() || value < 0.0 {
                self.fail(field, "must be a non-negative number");
            }
        }
        self
    }

    pub fn fail(&mut self, field: &str, message: &str) -> &mut Self {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.to_string(),
        });
        self
    }

    pub fn finish(&mut self) -> Result<(), PoolmateError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(PoolmateError::ValidationFailed(std::mem::take(&mut self.errors)))
        }
    }
}

/// Trims and drops empty optional text.
pub fn clean_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Non-empty id or `MissingRequiredField`.
pub fn required_id(field: &str, value: Option<&str>) -> Result<String, PoolmateError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PoolmateError::MissingRequiredField(field.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_all_errors() {
        let err = Validator::new()
            .require("first_name", " ")
            .email("email", "not-an-email")
            .non_negative("estimated_fare", Some(-3.0))
            .finish()
            .unwrap_err();

        match err {
            PoolmateError::ValidationFailed(errors) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["first_name", "email", "estimated_fare"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_passes_clean_input() {
        assert!(Validator::new()
            .require("first_name", "Asha")
            .email("email", "asha@example.com")
            .non_negative("estimated_fare", None)
            .finish()
            .is_ok());
    }

    #[test]
    fn test_required_id() {
        assert_eq!(required_id("driver_id", Some(" drv-1 ")).unwrap(), "drv-1");
        assert!(matches!(
            required_id("driver_id", Some("")),
            Err(PoolmateError::MissingRequiredField(_))
        ));
        assert!(required_id("driver_id", None).is_err());
        assert_eq!(clean_text(Some("  ".into())), None);
    }
}
