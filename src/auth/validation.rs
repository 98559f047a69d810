// Registration input validation

use crate::core::errors::IdentityError;
use regex::Regex;
use std::sync::LazyLock;

/// Column width of username and email in the store
pub const MAX_USERNAME_LENGTH: usize = 256;
pub const MAX_EMAIL_LENGTH: usize = 256;
pub const MAX_PASSWORD_LENGTH: usize = 128;

static USERNAME_REGEX: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$"));
static EMAIL_REGEX: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"));

fn matches(pattern: &LazyLock<Result<Regex, regex::Error>>, value: &str) -> Result<bool, IdentityError> {
    match pattern.as_ref() {
        Ok(regex) => Ok(regex.is_match(value)),
        Err(e) => Err(IdentityError::Configuration(format!("Invalid validation pattern: {}", e))),
    }
}

pub fn validate_username(username: &str) -> Result<(), IdentityError> {
    if username.is_empty() {
        return Err(IdentityError::Validation("username must not be empty".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(IdentityError::Validation(format!(
            "username longer than {} characters",
            MAX_USERNAME_LENGTH
        )));
    }
    if !matches(&USERNAME_REGEX, username)? {
        return Err(IdentityError::Validation(
            "username may only contain letters, digits, '.', '_' and '-'".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), IdentityError> {
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(IdentityError::Validation(format!(
            "email longer than {} characters",
            MAX_EMAIL_LENGTH
        )));
    }
    if !matches(&EMAIL_REGEX, email)? {
        return Err(IdentityError::Validation("email address is malformed".to_string()));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), IdentityError> {
    if password.is_empty() {
        return Err(IdentityError::Validation("password must not be empty".to_string()));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(IdentityError::Validation(format!(
            "password longer than {} bytes",
            MAX_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Validate a full registration request
pub fn validate_registration(username: &str, password: &str, email: &str) -> Result<(), IdentityError> {
    validate_username(username)?;
    validate_email(email)?;
    validate_password(password)
}
