// src/models/room.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

// ==================== ROOM STATUS ====================

/// Status persisted on the room row. The displayed status is derived in `occupancy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, IntoStaticStr, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum RoomStatus {
    Available,
    Occupied,
    Cleaning,
    Maintenance,
    Blocked,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }

    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_some()
    }

    /// Rooms in these states are never offered for new stays.
    pub fn is_out_of_service(self) -> bool {
        matches!(self, RoomStatus::Maintenance | RoomStatus::Blocked)
    }
}

impl Default for RoomStatus {
    fn default() -> Self {
        RoomStatus::Available
    }
}

// ==================== ROOM ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Room {
    pub id: String,
    pub number: String,
    pub name: String,
    pub category: String,
    pub capacity: i64,
    pub daily_rate: f64,
    pub floor: Option<i64>,
    pub description: Option<String>,
    pub amenities: Option<String>,
    pub status: String,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    pub fn stored_status(&self) -> RoomStatus {
        RoomStatus::parse(&self.status).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateRoomRequest {
    #[validate(length(min = 1, max = 20, message = "Room number must be between 1 and 20 characters"))]
    pub number: String,
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 50, message = "Category must be between 1 and 50 characters"))]
    pub category: String,
    #[validate(range(min = 1, max = 20, message = "Capacity must be between 1 and 20"))]
    pub capacity: i64,
    #[validate(range(min = 0.0, message = "Daily rate cannot be negative"))]
    pub daily_rate: f64,
    pub floor: Option<i64>,
    #[validate(length(max = 1000, message = "Description cannot exceed 1000 characters"))]
    pub description: Option<String>,
    #[validate(length(max = 1000, message = "Amenities cannot exceed 1000 characters"))]
    pub amenities: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct UpdateRoomRequest {
    #[validate(length(min = 1, max = 20, message = "Room number must be between 1 and 20 characters"))]
    pub number: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Category must be between 1 and 50 characters"))]
    pub category: Option<String>,
    #[validate(range(min = 1, max = 20, message = "Capacity must be between 1 and 20"))]
    pub capacity: Option<i64>,
    #[validate(range(min = 0.0, message = "Daily rate cannot be negative"))]
    pub daily_rate: Option<f64>,
    pub floor: Option<i64>,
    #[validate(length(max = 1000, message = "Description cannot exceed 1000 characters"))]
    pub description: Option<String>,
    #[validate(length(max = 1000, message = "Amenities cannot exceed 1000 characters"))]
    pub amenities: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoomStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AvailabilityQuery {
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub guests: Option<i64>,
}

/// Booking that currently holds the room, shown next to the room in listings.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ActiveBookingSummary {
    pub id: String,
    pub room_id: String,
    pub guest_id: String,
    pub guest_name: String,
    pub status: String,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone)]
pub struct RoomWithStatus {
    #[serde(flatten)]
    pub room: Room,
    pub effective_status: RoomStatus,
    pub active_booking: Option<ActiveBookingSummary>,
}

/// Room data safe to expose on the public site.
#[derive(Debug, Serialize, sqlx::FromRow, Clone)]
pub struct PublicRoom {
    pub id: String,
    pub name: String,
    pub category: String,
    pub capacity: i64,
    pub daily_rate: f64,
    pub description: Option<String>,
    pub amenities: Option<String>,
}

impl From<Room> for PublicRoom {
    fn from(room: Room) -> Self {
        Self {
            id: room.id,
            name: room.name,
            category: room.category,
            capacity: room.capacity,
            daily_rate: room.daily_rate,
            description: room.description,
            amenities: room.amenities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_status_from_str() {
        assert_eq!(RoomStatus::parse("AVAILABLE"), Some(RoomStatus::Available));
        assert_eq!(RoomStatus::parse("cleaning"), Some(RoomStatus::Cleaning));
        assert_eq!(RoomStatus::parse("reserved"), None);
        assert!(RoomStatus::is_valid("BLOCKED"));
    }

    #[test]
    fn test_room_status_display() {
        assert_eq!(RoomStatus::Maintenance.as_str(), "MAINTENANCE");
        assert_eq!(RoomStatus::Occupied.to_string(), "OCCUPIED");
        assert!(RoomStatus::Blocked.is_out_of_service());
        assert!(!RoomStatus::Cleaning.is_out_of_service());
    }

    #[test]
    fn test_create_room_request_validation() {
        let request = CreateRoomRequest {
            number: "101".to_string(),
            name: "Suíte Jardim".to_string(),
            category: "SUITE".to_string(),
            capacity: 0,
            daily_rate: 350.0,
            floor: Some(1),
            description: None,
            amenities: None,
            status: None,
        };
        assert!(request.validate().is_err());

        let request = CreateRoomRequest { capacity: 2, ..request };
        assert!(request.validate().is_ok());
    }
}
