use once_cell::sync::Lazy;
use regex::Regex;
use rocket::serde::json::Json;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::AppError;

pub static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").expect("time regex"));

pub fn validate_time(value: &str) -> Result<(), ValidationError> {
    if TIME_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new("time").with_message("Time must be formatted HH:MM".into()))
    }
}

/// Academic years are free-form level codes ("1AS", "4MS", "NS"), not a
/// fixed pattern. Reject only blank or absurdly long values.
pub fn validate_academic_year(value: &str) -> Result<(), ValidationError> {
    let code = value.trim();
    if code.is_empty() || code.len() > 32 {
        Err(ValidationError::new("academic_year")
            .with_message("Academic year must be a level code such as 1AS".into()))
    } else {
        Ok(())
    }
}

fn collapse(errors: ValidationErrors) -> AppError {
    let mut parts: Vec<String> = errors
        .field_errors()
        .iter()
        .map(|(field, field_errors)| {
            let messages: Vec<String> = field_errors
                .iter()
                .map(|e| {
                    e.message
                        .clone()
                        .unwrap_or_else(|| "Invalid value".into())
                        .to_string()
                })
                .collect();
            format!("{}: {}", field, messages.join(", "))
        })
        .collect();
    parts.sort();

    AppError::Validation(parts.join("; "))
}

/// Unwrap a JSON body after running its `validator` rules, collapsing any
/// field errors into a single validation error.
pub trait JsonValidateExt<T> {
    fn validate_custom(self) -> Result<T, AppError>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    fn validate_custom(self) -> Result<T, AppError> {
        self.0.validate().map_err(collapse)?;
        Ok(self.0)
    }
}
