//! Field validation for node registration.
//!
//! Every string field is trimmed before its length is checked, and lengths
//! are counted in characters rather than bytes.

use thiserror::Error;

pub const NAME_MAX: usize = 128;
pub const HOST_MAX: usize = 255;
pub const REGION_MIN: usize = 2;
pub const REGION_MAX: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be between {min} and {max} characters (got {len})")]
    Length { field: &'static str, min: usize, max: usize, len: usize },

    #[error("Port 0 is not valid")]
    Port,
}

/// Trim `value` and check its character count against `[min, max]`
pub fn validate_text(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();

    if len < min || len > max {
        return Err(ValidationError::Length { field, min, max, len });
    }

    Ok(trimmed.to_string())
}

pub fn validate_name(name: &str) -> Result<String, ValidationError> {
    validate_text("name", name, 1, NAME_MAX)
}

pub fn validate_host(host: &str) -> Result<String, ValidationError> {
    validate_text("host", host, 1, HOST_MAX)
}

pub fn validate_region(region: &str) -> Result<String, ValidationError> {
    validate_text("region", region, REGION_MIN, REGION_MAX)
}

/// Validate port is in valid range
pub fn validate_port(port: u16) -> Result<u16, ValidationError> {
    if port == 0 {
        return Err(ValidationError::Port);
    }
    Ok(port)
}
