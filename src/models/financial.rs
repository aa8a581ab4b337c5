// src/models/financial.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, NaiveDate, Utc};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

// ==================== ENUMS ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, IntoStaticStr, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum TransactionKind {
    Income,
    Expense,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, IntoStaticStr, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum RevenueSource {
    Booking,
    ExtraService,
    Restaurant,
    Event,
    Other,
}

impl RevenueSource {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }
}

impl Default for RevenueSource {
    fn default() -> Self {
        RevenueSource::Other
    }
}

/// Expense categories created on demand by stock purchases and maintenance.
pub const STOCK_EXPENSE_CATEGORY: &str = "Estoque";
pub const MAINTENANCE_EXPENSE_CATEGORY: &str = "Manutenção";

/// Categories created by `/setup/seed`.
pub const DEFAULT_EXPENSE_CATEGORIES: &[&str] = &[
    "Folha de pagamento",
    "Energia",
    "Água",
    "Internet e telefone",
    "Lavanderia",
    "Marketing",
    "Impostos e taxas",
    STOCK_EXPENSE_CATEGORY,
    MAINTENANCE_EXPENSE_CATEGORY,
];

// ==================== EXPENSE CATEGORY ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ExpenseCategory {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateExpenseCategoryRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: String,
    #[validate(length(max = 500, message = "Description cannot exceed 500 characters"))]
    pub description: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct UpdateExpenseCategoryRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 500, message = "Description cannot exceed 500 characters"))]
    pub description: Option<String>,
    pub color: Option<String>,
}

// ==================== EXPENSE ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Expense {
    pub id: String,
    pub category_id: String,
    pub description: String,
    pub amount: f64,
    pub expense_date: NaiveDate,
    pub payment_method: Option<String>,
    pub supplier: Option<String>,
    pub notes: Option<String>,
    pub purchase_id: Option<String>,
    pub maintenance_id: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ExpenseWithCategory {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub expense: Expense,
    pub category_name: String,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateExpenseRequest {
    #[validate(length(min = 1, message = "Category is required"))]
    pub category_id: String,
    #[validate(length(min = 1, max = 255, message = "Description must be between 1 and 255 characters"))]
    pub description: String,
    #[validate(range(min = 0.01, message = "Amount must be positive"))]
    pub amount: f64,
    pub expense_date: NaiveDate,
    #[validate(length(max = 50, message = "Payment method cannot exceed 50 characters"))]
    pub payment_method: Option<String>,
    #[validate(length(max = 255, message = "Supplier cannot exceed 255 characters"))]
    pub supplier: Option<String>,
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct UpdateExpenseRequest {
    pub category_id: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Description must be between 1 and 255 characters"))]
    pub description: Option<String>,
    #[validate(range(min = 0.01, message = "Amount must be positive"))]
    pub amount: Option<f64>,
    pub expense_date: Option<NaiveDate>,
    #[validate(length(max = 50, message = "Payment method cannot exceed 50 characters"))]
    pub payment_method: Option<String>,
    #[validate(length(max = 255, message = "Supplier cannot exceed 255 characters"))]
    pub supplier: Option<String>,
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

// ==================== REVENUE ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Revenue {
    pub id: String,
    pub source: String,
    pub description: String,
    pub amount: f64,
    pub revenue_date: NaiveDate,
    pub payment_method: Option<String>,
    pub booking_id: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateRevenueRequest {
    pub source: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Description must be between 1 and 255 characters"))]
    pub description: String,
    #[validate(range(min = 0.01, message = "Amount must be positive"))]
    pub amount: f64,
    pub revenue_date: NaiveDate,
    #[validate(length(max = 50, message = "Payment method cannot exceed 50 characters"))]
    pub payment_method: Option<String>,
    pub booking_id: Option<String>,
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct UpdateRevenueRequest {
    pub source: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Description must be between 1 and 255 characters"))]
    pub description: Option<String>,
    #[validate(range(min = 0.01, message = "Amount must be positive"))]
    pub amount: Option<f64>,
    pub revenue_date: Option<NaiveDate>,
    #[validate(length(max = 50, message = "Payment method cannot exceed 50 characters"))]
    pub payment_method: Option<String>,
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

// ==================== TRANSACTION ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Transaction {
    pub id: String,
    pub kind: String,
    pub amount: f64,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub expense_id: Option<String>,
    pub revenue_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ==================== QUERIES ====================

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FinancialQuery {
    #[serde(alias = "from")]
    pub start_date: Option<NaiveDate>,
    #[serde(alias = "to")]
    pub end_date: Option<NaiveDate>,
    pub category_id: Option<String>,
    pub source: Option<String>,
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DreQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub tax_rate: Option<f64>,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct FinancialSummary {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub total_income: f64,
    pub total_expenses: f64,
    pub balance: f64,
    pub outstanding_receivables: f64,
}
