// src/models/mod.rs

pub mod booking;
pub mod financial;
pub mod guest;
pub mod maintenance;
pub mod organization;
pub mod pool;
pub mod quote;
pub mod room;
pub mod stock;
pub mod team;

pub use booking::*;
pub use financial::*;
pub use guest::*;
pub use maintenance::*;
pub use organization::*;
pub use pool::*;
pub use quote::*;
pub use room::*;
pub use stock::*;
pub use team::*;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

// ==================== COMMON / SHARED ====================

/// Priority shared by maintenance orders and team tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, IntoStaticStr, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// Parses an optional enum field coming from a request, defaulting when absent.
pub fn parse_or_default<T, F>(value: Option<&str>, parse: F, field: &str) -> crate::error::ApiResult<T>
where
    T: Default,
    F: Fn(&str) -> Option<T>,
{
    match value {
        None => Ok(T::default()),
        Some(raw) => parse(raw).ok_or_else(|| {
            crate::error::ApiError::ValidationError(format!("Invalid {}: '{}'", field, raw))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_parsing() {
        assert_eq!(Priority::parse("HIGH"), Some(Priority::High));
        assert_eq!(Priority::parse("urgent"), Some(Priority::Urgent));
        assert_eq!(Priority::parse("whenever"), None);
        assert_eq!(Priority::Low.as_str(), "LOW");
    }

    #[test]
    fn test_parse_or_default() {
        let p: Priority = parse_or_default(None, Priority::parse, "priority").unwrap();
        assert_eq!(p, Priority::Medium);
        assert!(parse_or_default(Some("nope"), Priority::parse, "priority").is_err());
    }
}
