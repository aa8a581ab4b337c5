// src/models/guest.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, NaiveDate, Utc};

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Guest {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub document: Option<String>,
    pub document_type: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub nationality: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow, Clone)]
pub struct GuestSummary {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub guest: Guest,
    pub bookings_count: i64,
    pub last_stay: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct CreateGuestRequest {
    #[validate(length(min = 2, max = 255, message = "Name must be between 2 and 255 characters"))]
    pub name: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    #[validate(length(max = 30, message = "Phone cannot exceed 30 characters"))]
    pub phone: Option<String>,
    #[validate(length(max = 30, message = "Document cannot exceed 30 characters"))]
    pub document: Option<String>,
    #[validate(length(max = 20, message = "Document type cannot exceed 20 characters"))]
    pub document_type: Option<String>,
    pub birth_date: Option<NaiveDate>,
    #[validate(length(max = 100, message = "Nationality cannot exceed 100 characters"))]
    pub nationality: Option<String>,
    #[validate(length(max = 500, message = "Address cannot exceed 500 characters"))]
    pub address: Option<String>,
    #[validate(length(max = 100, message = "City cannot exceed 100 characters"))]
    pub city: Option<String>,
    #[validate(length(max = 50, message = "State cannot exceed 50 characters"))]
    pub state: Option<String>,
    #[validate(length(max = 2000, message = "Notes cannot exceed 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct UpdateGuestRequest {
    #[validate(length(min = 2, max = 255, message = "Name must be between 2 and 255 characters"))]
    pub name: Option<String>,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    #[validate(length(max = 30, message = "Phone cannot exceed 30 characters"))]
    pub phone: Option<String>,
    #[validate(length(max = 30, message = "Document cannot exceed 30 characters"))]
    pub document: Option<String>,
    #[validate(length(max = 20, message = "Document type cannot exceed 20 characters"))]
    pub document_type: Option<String>,
    pub birth_date: Option<NaiveDate>,
    #[validate(length(max = 100, message = "Nationality cannot exceed 100 characters"))]
    pub nationality: Option<String>,
    #[validate(length(max = 500, message = "Address cannot exceed 500 characters"))]
    pub address: Option<String>,
    #[validate(length(max = 100, message = "City cannot exceed 100 characters"))]
    pub city: Option<String>,
    #[validate(length(max = 50, message = "State cannot exceed 50 characters"))]
    pub state: Option<String>,
    #[validate(length(max = 2000, message = "Notes cannot exceed 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GuestQuery {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}
