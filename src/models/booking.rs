// src/models/booking.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, NaiveDate, Utc};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

// ==================== BOOKING STATUS ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, IntoStaticStr, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum BookingStatus {
    PreBooking,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }

    /// No further edits or transitions once a stay has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::CheckedOut | BookingStatus::Cancelled | BookingStatus::NoShow)
    }

    /// Statuses that hold the room and therefore conflict with overlapping stays.
    pub fn holds_room(self) -> bool {
        matches!(self, BookingStatus::PreBooking | BookingStatus::Confirmed | BookingStatus::CheckedIn)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (PreBooking, Confirmed)
                | (PreBooking, Cancelled)
                | (Confirmed, CheckedIn)
                | (Confirmed, Cancelled)
                | (Confirmed, NoShow)
                | (CheckedIn, CheckedOut)
        )
    }
}

/// SQL list of statuses that hold a room, for `status IN (...)` clauses.
pub const ROOM_HOLDING_STATUSES: &str = "'PRE_BOOKING', 'CONFIRMED', 'CHECKED_IN'";

// ==================== BOOKING ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Booking {
    pub id: String,
    pub room_id: String,
    pub guest_id: String,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub adults: i64,
    pub children: i64,
    pub status: String,
    pub total_amount: f64,
    pub paid_amount: f64,
    pub source: String,
    pub notes: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn booking_status(&self) -> Option<BookingStatus> {
        BookingStatus::parse(&self.status)
    }

    pub fn balance_due(&self) -> f64 {
        round_cents(self.total_amount - self.paid_amount)
    }

    pub fn nights(&self) -> i64 {
        nights_between(self.check_in, self.check_out)
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct BookingDetails {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub booking: Booking,
    pub room_number: String,
    pub room_name: String,
    pub guest_name: String,
    pub guest_phone: Option<String>,
}

/// Number of nights billed for a stay; partial days count as a full night.
pub fn nights_between(check_in: DateTime<Utc>, check_out: DateTime<Utc>) -> i64 {
    let minutes = (check_out - check_in).num_minutes();
    if minutes <= 0 {
        return 0;
    }
    (minutes + 24 * 60 - 1) / (24 * 60)
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateBookingRequest {
    #[validate(length(min = 1, message = "Room is required"))]
    pub room_id: String,
    #[validate(length(min = 1, message = "Guest is required"))]
    pub guest_id: String,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    #[validate(range(min = 1, max = 20, message = "Adults must be between 1 and 20"))]
    pub adults: i64,
    #[validate(range(min = 0, max = 20, message = "Children must be between 0 and 20"))]
    pub children: Option<i64>,
    #[validate(range(min = 0.0, message = "Total amount cannot be negative"))]
    pub total_amount: Option<f64>,
    pub status: Option<String>,
    #[validate(length(max = 2000, message = "Notes cannot exceed 2000 characters"))]
    pub notes: Option<String>,
}

/// Reservation placed from the public site; the guest is matched or registered on the fly.
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct PublicReservationRequest {
    #[validate(length(min = 1, message = "Room is required"))]
    pub room_id: String,
    #[validate(length(min = 2, max = 255, message = "Name must be between 2 and 255 characters"))]
    pub name: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(max = 30, message = "Phone cannot exceed 30 characters"))]
    pub phone: Option<String>,
    #[validate(length(max = 30, message = "Document cannot exceed 30 characters"))]
    pub document: Option<String>,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    #[validate(range(min = 1, max = 20, message = "Adults must be between 1 and 20"))]
    pub adults: i64,
    #[validate(range(min = 0, max = 20, message = "Children must be between 0 and 20"))]
    pub children: Option<i64>,
    #[validate(length(max = 2000, message = "Notes cannot exceed 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct UpdateBookingRequest {
    pub room_id: Option<String>,
    pub check_in: Option<DateTime<Utc>>,
    pub check_out: Option<DateTime<Utc>>,
    #[validate(range(min = 1, max = 20, message = "Adults must be between 1 and 20"))]
    pub adults: Option<i64>,
    #[validate(range(min = 0, max = 20, message = "Children must be between 0 and 20"))]
    pub children: Option<i64>,
    #[validate(range(min = 0.0, message = "Total amount cannot be negative"))]
    pub total_amount: Option<f64>,
    #[validate(length(max = 2000, message = "Notes cannot exceed 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct RegisterPaymentRequest {
    #[validate(range(min = 0.01, message = "Payment amount must be positive"))]
    pub amount: f64,
    #[validate(length(max = 50, message = "Payment method cannot exceed 50 characters"))]
    pub payment_method: Option<String>,
    pub paid_on: Option<NaiveDate>,
    #[validate(length(max = 500, message = "Notes cannot exceed 500 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BookingQuery {
    pub status: Option<String>,
    pub room_id: Option<String>,
    pub guest_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TodayOverview {
    pub date: NaiveDate,
    pub arrivals: Vec<BookingDetails>,
    pub departures: Vec<BookingDetails>,
    pub in_house: Vec<BookingDetails>,
}
