//! Input validation and sanitizing for API requests.
//!
//! Validators return `Result<(), String>` so they can be fed straight into
//! `ValidationErrorBuilder::check`.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?)+$")
            .unwrap();

    /// Digits with optional leading +, spaces, dashes, dots and parentheses
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9 ()\-.]{6,24}$").unwrap();

    static ref HTML_TAG_REGEX: Regex = Regex::new(r"<[^>]*>").unwrap();
}

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

/// Longest accepted free-text body (contact messages, tickets, notes).
pub const MAX_TEXT_LEN: usize = 5000;

/// Longest accepted single-line field (names, subjects, plans).
pub const MAX_LINE_LEN: usize = 200;

/// Lowercase and trim an email address for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(format!(
            "Password must be at most {} characters",
            MAX_PASSWORD_LEN
        ));
    }
    Ok(())
}

pub fn validate_phone(phone: &str) -> Result<(), String> {
    if !PHONE_REGEX.is_match(phone) {
        return Err("Invalid phone number".to_string());
    }
    Ok(())
}

/// Require a non-empty value of at most `max` characters.
pub fn validate_required(label: &str, value: &str, max: usize) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{} is required", label));
    }
    if value.chars().count() > max {
        return Err(format!("{} is too long (max {} characters)", label, max));
    }
    Ok(())
}

/// Strip markup and control characters and trim. Newlines and tabs survive.
pub fn sanitize_text(input: &str) -> String {
    let without_tags = HTML_TAG_REGEX.replace_all(input, "");
    without_tags
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Sanitize an optional field; blank values become `None`.
pub fn sanitize_optional(input: Option<&str>) -> Option<String> {
    input.map(sanitize_text).filter(|s| !s.is_empty())
}
