// src/validation.rs - Shared field normalization and validation helpers
use regex::Regex;
use lazy_static::lazy_static;
use chrono::{DateTime, NaiveTime, Utc};
use crate::error::{ApiError, ApiResult};

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9 ()-]{8,20}$").unwrap();
    static ref HEX_COLOR_REGEX: Regex = Regex::new(r"^#[0-9a-fA-F]{6}$").unwrap();
}

/// Canonical form of a national ID (CPF, RG, passport): alphanumerics only, upper-case.
/// `"123.456.789-09"` and `"12345678909"` normalize to the same value.
pub fn normalize_document(raw: &str) -> Option<String> {
    let normalized: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

pub fn normalize_email(raw: &str) -> Option<String> {
    let trimmed = raw.trim().to_lowercase();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Trims an optional free-text field and drops it when blank.
pub fn clean_optional(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn validate_email(email: &str) -> ApiResult<()> {
    if EMAIL_REGEX.is_match(email) {
        Ok(())
    } else {
        Err(ApiError::ValidationError(format!("Invalid email address: {}", email)))
    }
}

pub fn validate_phone(phone: &str) -> ApiResult<()> {
    if PHONE_REGEX.is_match(phone.trim()) {
        Ok(())
    } else {
        Err(ApiError::ValidationError(format!("Invalid phone number: {}", phone)))
    }
}

pub fn validate_color(color: &str) -> ApiResult<()> {
    if HEX_COLOR_REGEX.is_match(color) {
        Ok(())
    } else {
        Err(ApiError::ValidationError("Color must be a hex value like #1a2b3c".to_string()))
    }
}

/// `HH:MM` wall-clock time used for check-in/check-out policies.
pub fn validate_clock_time(value: &str) -> ApiResult<()> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map(|_| ())
        .map_err(|_| ApiError::ValidationError(format!("Invalid time '{}', expected HH:MM", value)))
}

pub fn validate_date_range(start: DateTime<Utc>, end: DateTime<Utc>, what: &str) -> ApiResult<()> {
    if end <= start {
        return Err(ApiError::ValidationError(format!("{} end must be after its start", what)));
    }
    Ok(())
}

pub fn validate_amount(amount: f64) -> ApiResult<()> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(ApiError::ValidationError("Amount must be a non-negative number".to_string()));
    }
    if amount > 1e9 {
        return Err(ApiError::ValidationError("Amount too large".to_string()));
    }
    Ok(())
}

/// Escapes LIKE wildcards so user search text matches literally (`ESCAPE '\'`).
pub fn escape_like_pattern(pattern: &str) -> String {
    pattern
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_normalize_document() {
        assert_eq!(normalize_document("123.456.789-09").as_deref(), Some("12345678909"));
        assert_eq!(normalize_document(" 12345678909 ").as_deref(), Some("12345678909"));
        assert_eq!(normalize_document("ab-123456").as_deref(), Some("AB123456"));
        assert_eq!(normalize_document(" .-/ "), None);
    }

    #[test]
    fn test_contact_validation() {
        assert!(validate_email("reservas@pousada.com.br").is_ok());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_phone("+55 (21) 99999-0000").is_ok());
        assert!(validate_phone("12").is_err());
        assert_eq!(normalize_email("  Maria@Example.COM ").as_deref(), Some("maria@example.com"));
    }

    #[test]
    fn test_misc_validators() {
        assert!(validate_color("#AABBCC").is_ok());
        assert!(validate_color("red").is_err());
        assert!(validate_clock_time("14:00").is_ok());
        assert!(validate_clock_time("25:00").is_err());
        assert!(validate_amount(10.5).is_ok());
        assert!(validate_amount(-1.0).is_err());
        assert!(validate_amount(f64::NAN).is_err());

        let now = Utc::now();
        assert!(validate_date_range(now, now + Duration::hours(1), "Stay").is_ok());
        assert!(validate_date_range(now, now, "Stay").is_err());
    }

    #[test]
    fn test_escape_like_pattern() {
        assert_eq!(escape_like_pattern("100%"), "100\\%");
        assert_eq!(escape_like_pattern("a_b"), "a\\_b");
        assert_eq!(escape_like_pattern("plain"), "plain");
    }

    #[test]
    fn test_clean_optional() {
        assert_eq!(clean_optional(&Some("  x ".to_string())).as_deref(), Some("x"));
        assert_eq!(clean_optional(&Some("   ".to_string())), None);
        assert_eq!(clean_optional(&None), None);
    }
}
