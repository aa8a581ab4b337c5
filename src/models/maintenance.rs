// src/models/maintenance.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, IntoStaticStr, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum MaintenanceStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl MaintenanceStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }

    pub fn is_open(self) -> bool {
        matches!(self, MaintenanceStatus::Pending | MaintenanceStatus::InProgress)
    }
}

impl Default for MaintenanceStatus {
    fn default() -> Self {
        MaintenanceStatus::Pending
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct RoomMaintenance {
    pub id: String,
    pub room_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: String,
    pub status: String,
    pub blocks_room: bool,
    pub assigned_to: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cost: Option<f64>,
    pub expense_id: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoomMaintenance {
    pub fn maintenance_status(&self) -> MaintenanceStatus {
        MaintenanceStatus::parse(&self.status).unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct RoomMaintenanceWithRoom {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub maintenance: RoomMaintenance,
    pub room_number: String,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateMaintenanceRequest {
    #[validate(length(min = 1, message = "Room is required"))]
    pub room_id: String,
    #[validate(length(min = 1, max = 255, message = "Title must be between 1 and 255 characters"))]
    pub title: String,
    #[validate(length(max = 2000, message = "Description cannot exceed 2000 characters"))]
    pub description: Option<String>,
    pub priority: Option<String>,
    pub blocks_room: Option<bool>,
    #[validate(length(max = 255, message = "Assignee cannot exceed 255 characters"))]
    pub assigned_to: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    #[validate(range(min = 0.0, message = "Cost cannot be negative"))]
    pub cost: Option<f64>,
}

#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct UpdateMaintenanceRequest {
    #[validate(length(min = 1, max = 255, message = "Title must be between 1 and 255 characters"))]
    pub title: Option<String>,
    #[validate(length(max = 2000, message = "Description cannot exceed 2000 characters"))]
    pub description: Option<String>,
    pub priority: Option<String>,
    pub blocks_room: Option<bool>,
    #[validate(length(max = 255, message = "Assignee cannot exceed 255 characters"))]
    pub assigned_to: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    #[validate(range(min = 0.0, message = "Cost cannot be negative"))]
    pub cost: Option<f64>,
}

#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct CompleteMaintenanceRequest {
    #[validate(range(min = 0.0, message = "Cost cannot be negative"))]
    pub cost: Option<f64>,
    #[validate(length(max = 2000, message = "Notes cannot exceed 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MaintenanceQuery {
    pub status: Option<String>,
    pub room_id: Option<String>,
    pub priority: Option<String>,
}
