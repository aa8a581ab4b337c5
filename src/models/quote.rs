// src/models/quote.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, IntoStaticStr, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum QuoteStatus {
    Pending,
    Sent,
    Accepted,
    Rejected,
    Expired,
}

impl QuoteStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }

    /// Only open quotes can be turned into a booking.
    pub fn is_open(self) -> bool {
        matches!(self, QuoteStatus::Pending | QuoteStatus::Sent)
    }
}

/// Where a quote or booking originated.
pub const SOURCE_ADMIN: &str = "ADMIN";
pub const SOURCE_WEBSITE: &str = "WEBSITE";
pub const SOURCE_QUOTE: &str = "QUOTE";

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Quote {
    pub id: String,
    pub guest_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub adults: i64,
    pub children: i64,
    pub room_id: Option<String>,
    pub room_category: Option<String>,
    pub total_amount: Option<f64>,
    pub status: String,
    pub source: String,
    pub notes: Option<String>,
    pub booking_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateQuoteRequest {
    #[validate(length(min = 2, max = 255, message = "Name must be between 2 and 255 characters"))]
    pub guest_name: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    #[validate(length(max = 30, message = "Phone cannot exceed 30 characters"))]
    pub phone: Option<String>,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    #[validate(range(min = 1, max = 20, message = "Adults must be between 1 and 20"))]
    pub adults: i64,
    #[validate(range(min = 0, max = 20, message = "Children must be between 0 and 20"))]
    pub children: Option<i64>,
    pub room_id: Option<String>,
    #[validate(length(max = 50, message = "Category cannot exceed 50 characters"))]
    pub room_category: Option<String>,
    #[validate(range(min = 0.0, message = "Total amount cannot be negative"))]
    pub total_amount: Option<f64>,
    #[validate(length(max = 2000, message = "Notes cannot exceed 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct UpdateQuoteRequest {
    pub status: Option<String>,
    pub room_id: Option<String>,
    #[validate(range(min = 0.0, message = "Total amount cannot be negative"))]
    pub total_amount: Option<f64>,
    pub check_in: Option<DateTime<Utc>>,
    pub check_out: Option<DateTime<Utc>>,
    #[validate(length(max = 2000, message = "Notes cannot exceed 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct ConvertQuoteRequest {
    pub room_id: Option<String>,
    #[validate(range(min = 0.0, message = "Total amount cannot be negative"))]
    pub total_amount: Option<f64>,
    #[validate(length(max = 30, message = "Document cannot exceed 30 characters"))]
    pub document: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct QuoteQuery {
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_status() {
        assert_eq!(QuoteStatus::parse("sent"), Some(QuoteStatus::Sent));
        assert!(QuoteStatus::Pending.is_open());
        assert!(!QuoteStatus::Accepted.is_open());
        assert_eq!(QuoteStatus::Expired.as_str(), "EXPIRED");
    }
}
