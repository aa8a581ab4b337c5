// src/models/stock.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, NaiveDate, Utc};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, IntoStaticStr, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum MovementType {
    /// Adds to the current stock.
    In,
    /// Removes from the current stock; never below zero.
    Out,
    /// Sets the current stock to an absolute counted value.
    Adjustment,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }

    /// Stock level after applying the movement, or `None` when it would go negative.
    pub fn apply(self, current: f64, quantity: f64) -> Option<f64> {
        let next = match self {
            MovementType::In => current + quantity,
            MovementType::Out => current - quantity,
            MovementType::Adjustment => quantity,
        };
        if next < 0.0 {
            None
        } else {
            Some(next)
        }
    }
}

/// Stock categories created by `/setup/seed`.
pub const DEFAULT_STOCK_CATEGORIES: &[&str] = &[
    "Café da manhã",
    "Frigobar",
    "Limpeza",
    "Amenidades",
    "Rouparia",
];

// ==================== CATEGORY ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct StockCategory {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateStockCategoryRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: String,
    #[validate(length(max = 500, message = "Description cannot exceed 500 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct UpdateStockCategoryRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 500, message = "Description cannot exceed 500 characters"))]
    pub description: Option<String>,
}

// ==================== ITEM ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct StockItem {
    pub id: String,
    pub category_id: String,
    pub name: String,
    pub unit: String,
    pub current_stock: f64,
    pub minimum_stock: f64,
    pub unit_cost: Option<f64>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockItem {
    /// Low-stock alert: strictly below the configured minimum.
    pub fn is_low_stock(&self) -> bool {
        is_low_stock(self.current_stock, self.minimum_stock)
    }
}

pub fn is_low_stock(current: f64, minimum: f64) -> bool {
    current < minimum
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct StockItemView {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub item: StockItem,
    pub category_name: String,
    pub is_low_stock: bool,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateStockItemRequest {
    #[validate(length(min = 1, message = "Category is required"))]
    pub category_id: String,
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 20, message = "Unit must be between 1 and 20 characters"))]
    pub unit: String,
    #[validate(range(min = 0.0, message = "Current stock cannot be negative"))]
    pub current_stock: Option<f64>,
    #[validate(range(min = 0.0, message = "Minimum stock cannot be negative"))]
    pub minimum_stock: Option<f64>,
    #[validate(range(min = 0.0, message = "Unit cost cannot be negative"))]
    pub unit_cost: Option<f64>,
    #[validate(length(max = 255, message = "Location cannot exceed 255 characters"))]
    pub location: Option<String>,
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

/// Stock level changes go through `/adjust` so every change leaves a movement.
#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct UpdateStockItemRequest {
    pub category_id: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 20, message = "Unit must be between 1 and 20 characters"))]
    pub unit: Option<String>,
    #[validate(range(min = 0.0, message = "Minimum stock cannot be negative"))]
    pub minimum_stock: Option<f64>,
    #[validate(range(min = 0.0, message = "Unit cost cannot be negative"))]
    pub unit_cost: Option<f64>,
    #[validate(length(max = 255, message = "Location cannot exceed 255 characters"))]
    pub location: Option<String>,
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct AdjustStockRequest {
    pub movement_type: String,
    #[validate(range(min = 0.0, message = "Quantity cannot be negative"))]
    pub quantity: f64,
    #[validate(length(max = 500, message = "Reason cannot exceed 500 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StockItemQuery {
    pub category_id: Option<String>,
    pub search: Option<String>,
    pub low_stock: Option<bool>,
}

// ==================== MOVEMENT ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct StockMovement {
    pub id: String,
    pub item_id: String,
    pub movement_type: String,
    pub quantity: f64,
    pub previous_stock: f64,
    pub new_stock: f64,
    pub reason: Option<String>,
    pub purchase_id: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ==================== PURCHASE ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct StockPurchase {
    pub id: String,
    pub item_id: String,
    pub quantity: f64,
    pub unit_cost: f64,
    pub total_cost: f64,
    pub supplier: Option<String>,
    pub purchase_date: NaiveDate,
    pub notes: Option<String>,
    pub expense_id: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct StockPurchaseWithItem {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub purchase: StockPurchase,
    pub item_name: String,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateStockPurchaseRequest {
    #[validate(length(min = 1, message = "Item is required"))]
    pub item_id: String,
    #[validate(range(min = 0.001, message = "Quantity must be positive"))]
    pub quantity: f64,
    #[validate(range(min = 0.0, message = "Unit cost cannot be negative"))]
    pub unit_cost: f64,
    #[validate(length(max = 255, message = "Supplier cannot exceed 255 characters"))]
    pub supplier: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_apply() {
        assert_eq!(MovementType::In.apply(5.0, 3.0), Some(8.0));
        assert_eq!(MovementType::Out.apply(5.0, 3.0), Some(2.0));
        assert_eq!(MovementType::Out.apply(5.0, 5.0), Some(0.0));
        assert_eq!(MovementType::Out.apply(2.0, 3.0), None);
        assert_eq!(MovementType::Adjustment.apply(50.0, 12.0), Some(12.0));
    }

    #[test]
    fn test_low_stock_threshold_is_strict() {
        assert!(is_low_stock(4.0, 5.0));
        assert!(!is_low_stock(5.0, 5.0));
        assert!(!is_low_stock(0.0, 0.0));
    }

    #[test]
    fn test_movement_type_parse() {
        assert_eq!(MovementType::parse("out"), Some(MovementType::Out));
        assert_eq!(MovementType::parse("ADJUSTMENT"), Some(MovementType::Adjustment));
        assert_eq!(MovementType::parse("transfer"), None);
    }
}
