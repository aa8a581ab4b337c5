// src/financial_handlers.rs
//! Expenses, revenues, the transaction ledger and the DRE report

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use chrono::{NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;
use validator::Validate;
use log::info;

use crate::AppState;
use crate::audit::{audit, audit_with_changes, ChangeSet};
use crate::auth::{require_scope, Scope};
use crate::booking_handlers::apply_booking_payment;
use crate::dre::{dre_to_csv, load_dre, resolve_tax_rate};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::*;
use crate::validation::{clean_optional, validate_color};

// ==================== LEDGER HELPERS ====================

/// Fields of a new expense; also used by stock purchases and maintenance.
#[derive(Debug, Clone, Default)]
pub struct ExpenseEntry<'a> {
    pub category_id: &'a str,
    pub description: &'a str,
    pub amount: f64,
    pub expense_date: NaiveDate,
    pub payment_method: Option<&'a str>,
    pub supplier: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub purchase_id: Option<&'a str>,
    pub maintenance_id: Option<&'a str>,
    pub created_by: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct RevenueEntry<'a> {
    pub source: RevenueSource,
    pub description: &'a str,
    pub amount: f64,
    pub revenue_date: NaiveDate,
    pub payment_method: Option<&'a str>,
    pub booking_id: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub created_by: Option<&'a str>,
}

/// Id of the expense category with this name, creating it when missing.
pub async fn ensure_expense_category(conn: &mut SqliteConnection, name: &str) -> ApiResult<String> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM expense_categories WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some((id,)) = existing {
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query("INSERT INTO expense_categories (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(id)
}

/// Inserts the expense and its EXPENSE transaction.
pub async fn record_expense(conn: &mut SqliteConnection, entry: &ExpenseEntry<'_>) -> ApiResult<String> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let amount = round_cents(entry.amount);

    sqlx::query(
        r#"
        INSERT INTO expenses (id, category_id, description, amount, expense_date, payment_method, supplier,
                              notes, purchase_id, maintenance_id, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    )
    .bind(&id)
    .bind(entry.category_id)
    .bind(entry.description)
    .bind(amount)
    .bind(entry.expense_date)
    .bind(entry.payment_method)
    .bind(entry.supplier)
    .bind(entry.notes)
    .bind(entry.purchase_id)
    .bind(entry.maintenance_id)
    .bind(entry.created_by)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO transactions (id, kind, amount, transaction_date, description, expense_id, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(Uuid::new_v4().to_string())
    .bind(TransactionKind::Expense.as_str())
    .bind(amount)
    .bind(entry.expense_date)
    .bind(entry.description)
    .bind(&id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

/// Inserts the revenue and its INCOME transaction.
pub async fn record_revenue(conn: &mut SqliteConnection, entry: &RevenueEntry<'_>) -> ApiResult<String> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let amount = round_cents(entry.amount);

    sqlx::query(
        r#"
        INSERT INTO revenues (id, source, description, amount, revenue_date, payment_method, booking_id,
                              notes, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    )
    .bind(&id)
    .bind(entry.source.as_str())
    .bind(entry.description)
    .bind(amount)
    .bind(entry.revenue_date)
    .bind(entry.payment_method)
    .bind(entry.booking_id)
    .bind(entry.notes)
    .bind(entry.created_by)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO transactions (id, kind, amount, transaction_date, description, revenue_id, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(Uuid::new_v4().to_string())
    .bind(TransactionKind::Income.as_str())
    .bind(amount)
    .bind(entry.revenue_date)
    .bind(entry.description)
    .bind(&id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

fn parse_source(raw: Option<&str>) -> ApiResult<RevenueSource> {
    parse_or_default(raw, RevenueSource::parse, "revenue source")
}

fn check_date_range(query: &FinancialQuery) -> ApiResult<()> {
    if let (Some(start), Some(end)) = (query.start_date, query.end_date) {
        if end < start {
            return Err(ApiError::validation("end_date must not be before start_date"));
        }
    }
    Ok(())
}

// ==================== EXPENSE CATEGORIES ====================

async fn fetch_category(pool: &SqlitePool, id: &str) -> ApiResult<ExpenseCategory> {
    sqlx::query_as::<_, ExpenseCategory>("SELECT * FROM expense_categories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Expense category"))
}

async fn ensure_unique_category_name(pool: &SqlitePool, name: &str, exclude_id: &str) -> ApiResult<()> {
    let duplicate: Option<(String,)> = sqlx::query_as("SELECT id FROM expense_categories WHERE name = ? AND id != ?")
        .bind(name)
        .bind(exclude_id)
        .fetch_optional(pool)
        .await?;
    if duplicate.is_some() {
        return Err(ApiError::conflict("Expense category with this name already exists"));
    }
    Ok(())
}

pub async fn get_expense_categories(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Financial)?;
    let categories = sqlx::query_as::<_, ExpenseCategory>("SELECT * FROM expense_categories ORDER BY name")
        .fetch_all(&app_state.db_pool)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(categories)))
}

pub async fn create_expense_category(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateExpenseCategoryRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Financial)?;
    body.validate()?;
    if let Some(ref color) = body.color {
        validate_color(color)?;
    }

    let name = body.name.trim();
    ensure_unique_category_name(&app_state.db_pool, name, "").await?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query("INSERT INTO expense_categories (id, name, description, color, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(clean_optional(&body.description))
        .bind(clean_optional(&body.color))
        .bind(now)
        .bind(now)
        .execute(&app_state.db_pool)
        .await?;

    let category = fetch_category(&app_state.db_pool, &id).await?;
    audit(&app_state.db_pool, &claims, "create", "expense_category", &id,
        &format!("Created expense category {}", category.name), &http_request).await;
    Ok(HttpResponse::Created().json(ApiResponse::success(category)))
}

pub async fn update_expense_category(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdateExpenseCategoryRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Financial)?;
    body.validate()?;
    let id = path.into_inner();
    let existing = fetch_category(&app_state.db_pool, &id).await?;

    if let Some(ref color) = body.color {
        validate_color(color)?;
    }
    let name = body.name.as_ref().map(|n| n.trim().to_string()).unwrap_or_else(|| existing.name.clone());
    ensure_unique_category_name(&app_state.db_pool, &name, &id).await?;

    let description = clean_optional(&body.description).or_else(|| existing.description.clone());
    let color = clean_optional(&body.color).or_else(|| existing.color.clone());

    sqlx::query("UPDATE expense_categories SET name = ?, description = ?, color = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(&color)
        .bind(Utc::now())
        .bind(&id)
        .execute(&app_state.db_pool)
        .await?;

    let mut cs = ChangeSet::new();
    cs.add("name", &existing.name, &name);
    cs.add_opt("color", &existing.color, &color);

    let category = fetch_category(&app_state.db_pool, &id).await?;
    audit_with_changes(&app_state.db_pool, &claims, "edit", "expense_category", &id,
        &format!("Expense category {} updated", category.name), &cs, &http_request).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(category)))
}

pub async fn delete_expense_category(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Financial)?;
    let id = path.into_inner();
    let category = fetch_category(&app_state.db_pool, &id).await?;

    let in_use: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM expenses WHERE category_id = ?")
        .bind(&id)
        .fetch_one(&app_state.db_pool)
        .await?;
    if in_use.0 > 0 {
        return Err(ApiError::Conflict(format!(
            "Cannot delete category {}: it is used by {} expense(s)", category.name, in_use.0
        )));
    }

    sqlx::query("DELETE FROM expense_categories WHERE id = ?")
        .bind(&id)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "delete", "expense_category", &id,
        &format!("Deleted expense category {}", category.name), &http_request).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Expense category deleted".to_string())))
}

// ==================== EXPENSES ====================

const EXPENSE_SELECT: &str = r#"
    SELECT e.*, c.name AS category_name
    FROM expenses e
    JOIN expense_categories c ON c.id = e.category_id
"#;

async fn fetch_expense(pool: &SqlitePool, id: &str) -> ApiResult<ExpenseWithCategory> {
    let sql = format!("{} WHERE e.id = ?", EXPENSE_SELECT);
    sqlx::query_as::<_, ExpenseWithCategory>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Expense"))
}

async fn query_expenses(pool: &SqlitePool, query: &FinancialQuery) -> ApiResult<Vec<ExpenseWithCategory>> {
    check_date_range(query)?;

    let mut conditions = vec!["1=1".to_string()];
    let mut params: Vec<String> = Vec::new();
    if let Some(start) = query.start_date {
        conditions.push("e.expense_date >= ?".to_string());
        params.push(start.to_string());
    }
    if let Some(end) = query.end_date {
        conditions.push("e.expense_date <= ?".to_string());
        params.push(end.to_string());
    }
    if let Some(ref category_id) = query.category_id {
        conditions.push("e.category_id = ?".to_string());
        params.push(category_id.clone());
    }

    let sql = format!(
        "{} WHERE {} ORDER BY e.expense_date DESC, e.created_at DESC",
        EXPENSE_SELECT,
        conditions.join(" AND ")
    );
    let mut q = sqlx::query_as::<_, ExpenseWithCategory>(&sql);
    for p in &params {
        q = q.bind(p);
    }
    Ok(q.fetch_all(pool).await?)
}

pub async fn get_expenses(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<FinancialQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Financial)?;
    let expenses = query_expenses(&app_state.db_pool, &query).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(expenses)))
}

pub async fn get_expense(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Financial)?;
    let expense = fetch_expense(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(expense)))
}

pub async fn create_expense(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateExpenseRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Financial)?;
    body.validate()?;
    fetch_category(&app_state.db_pool, &body.category_id).await?;

    let payment_method = clean_optional(&body.payment_method);
    let supplier = clean_optional(&body.supplier);
    let notes = clean_optional(&body.notes);

    let mut tx = app_state.db_pool.begin().await?;
    let id = record_expense(&mut tx, &ExpenseEntry {
        category_id: &body.category_id,
        description: body.description.trim(),
        amount: body.amount,
        expense_date: body.expense_date,
        payment_method: payment_method.as_deref(),
        supplier: supplier.as_deref(),
        notes: notes.as_deref(),
        created_by: Some(&claims.sub),
        ..Default::default()
    }).await?;
    tx.commit().await?;

    let expense = fetch_expense(&app_state.db_pool, &id).await?;
    audit(&app_state.db_pool, &claims, "create", "expense", &id,
        &format!("Expense {} ({:.2})", expense.expense.description, expense.expense.amount), &http_request).await;
    info!("💸 Recorded expense {} of {:.2}", id, expense.expense.amount);
    Ok(HttpResponse::Created().json(ApiResponse::success(expense)))
}

pub async fn update_expense(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdateExpenseRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Financial)?;
    body.validate()?;
    let id = path.into_inner();
    let existing = fetch_expense(&app_state.db_pool, &id).await?.expense;

    let category_id = match body.category_id {
        Some(ref category_id) => fetch_category(&app_state.db_pool, category_id).await?.id,
        None => existing.category_id.clone(),
    };
    let description = body.description.as_ref().map(|d| d.trim().to_string()).unwrap_or_else(|| existing.description.clone());
    let amount = body.amount.map(round_cents).unwrap_or(existing.amount);
    let expense_date = body.expense_date.unwrap_or(existing.expense_date);
    let payment_method = clean_optional(&body.payment_method).or_else(|| existing.payment_method.clone());
    let supplier = clean_optional(&body.supplier).or_else(|| existing.supplier.clone());
    let notes = clean_optional(&body.notes).or_else(|| existing.notes.clone());

    let mut cs = ChangeSet::new();
    cs.add("category_id", &existing.category_id, &category_id);
    cs.add("description", &existing.description, &description);
    cs.add("amount", &existing.amount, &amount);
    cs.add("expense_date", &existing.expense_date, &expense_date);

    let now = Utc::now();
    let mut tx = app_state.db_pool.begin().await?;
    sqlx::query(
        r#"
        UPDATE expenses
        SET category_id = ?, description = ?, amount = ?, expense_date = ?, payment_method = ?,
            supplier = ?, notes = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(&category_id)
    .bind(&description)
    .bind(amount)
    .bind(expense_date)
    .bind(&payment_method)
    .bind(&supplier)
    .bind(&notes)
    .bind(now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE transactions SET amount = ?, transaction_date = ?, description = ? WHERE expense_id = ?")
        .bind(amount)
        .bind(expense_date)
        .bind(&description)
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let expense = fetch_expense(&app_state.db_pool, &id).await?;
    audit_with_changes(&app_state.db_pool, &claims, "edit", "expense", &id,
        &format!("Expense updated: {}", cs.to_description()), &cs, &http_request).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(expense)))
}

pub async fn delete_expense(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Financial)?;
    let id = path.into_inner();
    let expense = fetch_expense(&app_state.db_pool, &id).await?.expense;

    // The ledger row goes with it through ON DELETE CASCADE
    sqlx::query("DELETE FROM expenses WHERE id = ?")
        .bind(&id)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "delete", "expense", &id,
        &format!("Deleted expense {} ({:.2})", expense.description, expense.amount), &http_request).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Expense deleted".to_string())))
}

pub fn expenses_to_csv(expenses: &[ExpenseWithCategory]) -> ApiResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["date", "category", "description", "supplier", "payment_method", "amount"])?;
    for row in expenses {
        let e = &row.expense;
        writer.write_record([
            e.expense_date.to_string().as_str(),
            row.category_name.as_str(),
            e.description.as_str(),
            e.supplier.as_deref().unwrap_or(""),
            e.payment_method.as_deref().unwrap_or(""),
            format!("{:.2}", e.amount).as_str(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| ApiError::InternalServerError(format!("CSV export failed: {}", e)))
}

pub async fn export_expenses(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<FinancialQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Financial)?;
    let expenses = query_expenses(&app_state.db_pool, &query).await?;
    let body = expenses_to_csv(&expenses)?;

    info!("📤 {} exported {} expense(s)", claims.username, expenses.len());
    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header(("Content-Disposition", "attachment; filename=\"despesas.csv\""))
        .body(body))
}

// ==================== REVENUES ====================

async fn fetch_revenue(pool: &SqlitePool, id: &str) -> ApiResult<Revenue> {
    sqlx::query_as::<_, Revenue>("SELECT * FROM revenues WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Revenue"))
}

pub async fn get_revenues(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<FinancialQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Financial)?;
    check_date_range(&query)?;

    let mut conditions = vec!["1=1".to_string()];
    let mut params: Vec<String> = Vec::new();
    if let Some(start) = query.start_date {
        conditions.push("revenue_date >= ?".to_string());
        params.push(start.to_string());
    }
    if let Some(end) = query.end_date {
        conditions.push("revenue_date <= ?".to_string());
        params.push(end.to_string());
    }
    if let Some(ref source) = query.source {
        let source = RevenueSource::parse(source)
            .ok_or_else(|| ApiError::ValidationError(format!("Invalid revenue source: '{}'", source)))?;
        conditions.push("source = ?".to_string());
        params.push(source.as_str().to_string());
    }

    let sql = format!(
        "SELECT * FROM revenues WHERE {} ORDER BY revenue_date DESC, created_at DESC",
        conditions.join(" AND ")
    );
    let mut q = sqlx::query_as::<_, Revenue>(&sql);
    for p in &params {
        q = q.bind(p);
    }
    let revenues = q.fetch_all(&app_state.db_pool).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(revenues)))
}

pub async fn get_revenue(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Financial)?;
    let revenue = fetch_revenue(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(revenue)))
}

/// A revenue linked to a booking counts as a payment on it.
pub async fn create_revenue(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateRevenueRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Financial)?;
    body.validate()?;
    let source = parse_source(body.source.as_deref())?;
    let booking_id = clean_optional(&body.booking_id);
    let payment_method = clean_optional(&body.payment_method);
    let notes = clean_optional(&body.notes);

    let mut tx = app_state.db_pool.begin().await?;
    if let Some(ref booking_id) = booking_id {
        apply_booking_payment(&mut tx, booking_id, body.amount).await?;
    }
    let id = record_revenue(&mut tx, &RevenueEntry {
        source,
        description: body.description.trim(),
        amount: body.amount,
        revenue_date: body.revenue_date,
        payment_method: payment_method.as_deref(),
        booking_id: booking_id.as_deref(),
        notes: notes.as_deref(),
        created_by: Some(&claims.sub),
    }).await?;
    tx.commit().await?;

    let revenue = fetch_revenue(&app_state.db_pool, &id).await?;
    audit(&app_state.db_pool, &claims, "create", "revenue", &id,
        &format!("Revenue {} ({:.2}, {})", revenue.description, revenue.amount, revenue.source), &http_request).await;
    info!("💰 Recorded revenue {} of {:.2}", id, revenue.amount);
    Ok(HttpResponse::Created().json(ApiResponse::success(revenue)))
}

pub async fn update_revenue(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdateRevenueRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Financial)?;
    body.validate()?;
    let id = path.into_inner();
    let existing = fetch_revenue(&app_state.db_pool, &id).await?;

    let source = match body.source.as_deref() {
        Some(raw) => parse_source(Some(raw))?.as_str().to_string(),
        None => existing.source.clone(),
    };
    let description = body.description.as_ref().map(|d| d.trim().to_string()).unwrap_or_else(|| existing.description.clone());
    let amount = body.amount.map(round_cents).unwrap_or(existing.amount);
    let revenue_date = body.revenue_date.unwrap_or(existing.revenue_date);
    let payment_method = clean_optional(&body.payment_method).or_else(|| existing.payment_method.clone());
    let notes = clean_optional(&body.notes).or_else(|| existing.notes.clone());

    let mut cs = ChangeSet::new();
    cs.add("source", &existing.source, &source);
    cs.add("description", &existing.description, &description);
    cs.add("amount", &existing.amount, &amount);
    cs.add("revenue_date", &existing.revenue_date, &revenue_date);

    let mut tx = app_state.db_pool.begin().await?;
    if let Some(ref booking_id) = existing.booking_id {
        let delta = round_cents(amount - existing.amount);
        if delta != 0.0 {
            apply_booking_payment(&mut tx, booking_id, delta).await?;
        }
    }

    sqlx::query(
        r#"
        UPDATE revenues
        SET source = ?, description = ?, amount = ?, revenue_date = ?, payment_method = ?, notes = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(&source)
    .bind(&description)
    .bind(amount)
    .bind(revenue_date)
    .bind(&payment_method)
    .bind(&notes)
    .bind(Utc::now())
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE transactions SET amount = ?, transaction_date = ?, description = ? WHERE revenue_id = ?")
        .bind(amount)
        .bind(revenue_date)
        .bind(&description)
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let revenue = fetch_revenue(&app_state.db_pool, &id).await?;
    audit_with_changes(&app_state.db_pool, &claims, "edit", "revenue", &id,
        &format!("Revenue updated: {}", cs.to_description()), &cs, &http_request).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(revenue)))
}

/// Deleting a booking payment also reverses it on the booking.
pub async fn delete_revenue(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Financial)?;
    let id = path.into_inner();
    let revenue = fetch_revenue(&app_state.db_pool, &id).await?;

    let mut tx = app_state.db_pool.begin().await?;
    if let Some(ref booking_id) = revenue.booking_id {
        apply_booking_payment(&mut tx, booking_id, -revenue.amount).await?;
    }
    sqlx::query("DELETE FROM revenues WHERE id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&app_state.db_pool, &claims, "delete", "revenue", &id,
        &format!("Deleted revenue {} ({:.2})", revenue.description, revenue.amount), &http_request).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Revenue deleted".to_string())))
}

// ==================== TRANSACTIONS / SUMMARY ====================

pub async fn get_transactions(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<FinancialQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Financial)?;
    check_date_range(&query)?;

    let mut conditions = vec!["1=1".to_string()];
    let mut params: Vec<String> = Vec::new();
    if let Some(start) = query.start_date {
        conditions.push("transaction_date >= ?".to_string());
        params.push(start.to_string());
    }
    if let Some(end) = query.end_date {
        conditions.push("transaction_date <= ?".to_string());
        params.push(end.to_string());
    }
    if let Some(ref kind) = query.kind {
        let kind = TransactionKind::parse(kind)
            .ok_or_else(|| ApiError::ValidationError(format!("Invalid transaction kind: '{}'", kind)))?;
        conditions.push("kind = ?".to_string());
        params.push(kind.as_str().to_string());
    }

    let sql = format!(
        "SELECT * FROM transactions WHERE {} ORDER BY transaction_date DESC, created_at DESC",
        conditions.join(" AND ")
    );
    let mut q = sqlx::query_as::<_, Transaction>(&sql);
    for p in &params {
        q = q.bind(p);
    }
    let transactions = q.fetch_all(&app_state.db_pool).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(transactions)))
}

pub async fn load_summary(
    pool: &SqlitePool,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> ApiResult<FinancialSummary> {
    let totals: Vec<(String, f64)> = sqlx::query_as(
        r#"
        SELECT kind, CAST(COALESCE(SUM(amount), 0) AS REAL)
        FROM transactions
        WHERE (? IS NULL OR transaction_date >= ?) AND (? IS NULL OR transaction_date <= ?)
        GROUP BY kind
        "#
    )
    .bind(start_date)
    .bind(start_date)
    .bind(end_date)
    .bind(end_date)
    .fetch_all(pool)
    .await?;

    let total_for = |kind: TransactionKind| {
        totals.iter().find(|(k, _)| k == kind.as_str()).map(|(_, v)| *v).unwrap_or(0.0)
    };
    let total_income = round_cents(total_for(TransactionKind::Income));
    let total_expenses = round_cents(total_for(TransactionKind::Expense));

    let receivables: (f64,) = sqlx::query_as(
        r#"
        SELECT CAST(COALESCE(SUM(total_amount - paid_amount), 0) AS REAL)
        FROM bookings
        WHERE status IN ('CONFIRMED', 'CHECKED_IN', 'CHECKED_OUT') AND total_amount > paid_amount
        "#
    )
    .fetch_one(pool)
    .await?;

    Ok(FinancialSummary {
        start_date,
        end_date,
        total_income,
        total_expenses,
        balance: round_cents(total_income - total_expenses),
        outstanding_receivables: round_cents(receivables.0),
    })
}

pub async fn get_financial_summary(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<FinancialQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Financial)?;
    check_date_range(&query)?;
    let summary = load_summary(&app_state.db_pool, query.start_date, query.end_date).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(summary)))
}

// ==================== DRE ====================

async fn dre_for_query(app_state: &AppState, query: &DreQuery) -> ApiResult<crate::dre::DreReport> {
    let org_rate: Option<(Option<f64>,)> = sqlx::query_as("SELECT tax_rate FROM organizations WHERE id = ?")
        .bind(DEFAULT_ORGANIZATION_ID)
        .fetch_optional(&app_state.db_pool)
        .await?;

    let tax_rate = resolve_tax_rate(
        query.tax_rate,
        org_rate.and_then(|r| r.0),
        app_state.config.finance.default_tax_rate,
    )?;

    load_dre(&app_state.db_pool, query.start_date, query.end_date, tax_rate).await
}

pub async fn get_dre(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<DreQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Financial)?;
    let report = dre_for_query(&app_state, &query).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

pub async fn export_dre(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<DreQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Financial)?;
    let report = dre_for_query(&app_state, &query).await?;
    let body = dre_to_csv(&report)?;

    info!("📤 {} exported DRE {} to {}", claims.username, report.start_date, report.end_date);
    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"dre_{}_{}.csv\"", report.start_date, report.end_date),
        ))
        .body(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn category(state: &AppState, name: &str) -> String {
        let mut conn = state.db_pool.acquire().await.unwrap();
        ensure_expense_category(&mut conn, name).await.unwrap()
    }

    fn expense_body(category_id: &str, amount: f64, date: NaiveDate) -> web::Json<CreateExpenseRequest> {
        web::Json(CreateExpenseRequest {
            category_id: category_id.to_string(),
            description: "Conta de luz".to_string(),
            amount,
            expense_date: date,
            payment_method: Some("PIX".to_string()),
            supplier: Some("Cemig".to_string()),
            notes: None,
        })
    }

    fn revenue_body(amount: f64, date: NaiveDate, source: &str) -> CreateRevenueRequest {
        CreateRevenueRequest {
            source: Some(source.to_string()),
            description: "Jantar".to_string(),
            amount,
            revenue_date: date,
            payment_method: None,
            booking_id: None,
            notes: None,
        }
    }

    #[actix_rt::test]
    async fn test_ensure_expense_category_is_idempotent() {
        let state = test_state().await;
        let first = category(&state, STOCK_EXPENSE_CATEGORY).await;
        let second = category(&state, "estoque").await;
        assert_eq!(first, second);
    }

    #[actix_rt::test]
    async fn test_expense_keeps_transaction_in_sync() {
        let state = test_state().await;
        let cat = category(&state, "Energia").await;

        let resp = create_expense(state.clone(), expense_body(&cat, 320.5, day(2025, 3, 10)), owner_request()).await.unwrap();
        let id = response_json(resp).await["data"]["id"].as_str().unwrap().to_string();

        let update = UpdateExpenseRequest { amount: Some(410.0), expense_date: Some(day(2025, 3, 12)), ..Default::default() };
        update_expense(state.clone(), web::Path::from(id.clone()), web::Json(update), owner_request()).await.unwrap();

        let tx: (String, f64, NaiveDate) = sqlx::query_as("SELECT kind, amount, transaction_date FROM transactions WHERE expense_id = ?")
            .bind(&id)
            .fetch_one(&state.db_pool)
            .await
            .unwrap();
        assert_eq!(tx, ("EXPENSE".to_string(), 410.0, day(2025, 3, 12)));

        delete_expense(state.clone(), web::Path::from(id), owner_request()).await.unwrap();
        let left: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions").fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(left.0, 0);
    }

    #[actix_rt::test]
    async fn test_category_in_use_cannot_be_deleted() {
        let state = test_state().await;
        let cat = category(&state, "Lavanderia").await;
        create_expense(state.clone(), expense_body(&cat, 90.0, day(2025, 1, 5)), owner_request()).await.unwrap();

        let err = delete_expense_category(state.clone(), web::Path::from(cat), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[actix_rt::test]
    async fn test_financial_routes_require_scope() {
        let state = test_state().await;
        let err = get_expense_categories(state.clone(), staff_request(vec![Scope::Stock])).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(get_expense_categories(state.clone(), staff_request(vec![Scope::Financial])).await.is_ok());
    }

    #[actix_rt::test]
    async fn test_summary_and_dre_over_recorded_entries() {
        let state = test_state().await;
        let cat = category(&state, "Energia").await;
        create_expense(state.clone(), expense_body(&cat, 200.0, day(2025, 4, 2)), owner_request()).await.unwrap();
        create_expense(state.clone(), expense_body(&cat, 50.0, day(2025, 5, 2)), owner_request()).await.unwrap();
        create_revenue(state.clone(), web::Json(revenue_body(1000.0, day(2025, 4, 3), "RESTAURANT")), owner_request())
            .await
            .unwrap();

        let summary = load_summary(&state.db_pool, Some(day(2025, 4, 1)), Some(day(2025, 4, 30))).await.unwrap();
        assert_eq!(summary.total_income, 1000.0);
        assert_eq!(summary.total_expenses, 200.0);
        assert_eq!(summary.balance, 800.0);

        let query = web::Query(DreQuery { start_date: day(2025, 4, 1), end_date: day(2025, 4, 30), tax_rate: Some(10.0) });
        let body = response_json(get_dre(state.clone(), query, owner_request()).await.unwrap()).await;
        assert_eq!(body["data"]["gross_revenue"], 1000.0);
        assert_eq!(body["data"]["taxes"], 100.0);
        assert_eq!(body["data"]["result"], 700.0);
        assert_eq!(body["data"]["margin"], 70.0);
    }

    #[actix_rt::test]
    async fn test_dre_uses_organization_tax_rate_before_default() {
        let state = test_state().await;
        sqlx::query("UPDATE organizations SET tax_rate = 8 WHERE id = ?")
            .bind(DEFAULT_ORGANIZATION_ID)
            .execute(&state.db_pool)
            .await
            .unwrap();

        let query = web::Query(DreQuery { start_date: day(2025, 1, 1), end_date: day(2025, 1, 31), tax_rate: None });
        let body = response_json(get_dre(state.clone(), query, owner_request()).await.unwrap()).await;
        assert_eq!(body["data"]["tax_rate"], 8.0);
        assert_eq!(body["data"]["margin"], 0.0);
    }

    #[actix_rt::test]
    async fn test_expense_csv_export() {
        let state = test_state().await;
        let cat = category(&state, "Energia").await;
        create_expense(state.clone(), expense_body(&cat, 99.9, day(2025, 2, 1)), owner_request()).await.unwrap();

        let resp = export_expenses(state.clone(), web::Query(FinancialQuery::default()), owner_request()).await.unwrap();
        assert_eq!(resp.headers().get("content-type").unwrap(), "text/csv; charset=utf-8");
        let text = response_text(resp).await;
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("date,category,description,supplier,payment_method,amount"));
        assert_eq!(lines.next(), Some("2025-02-01,Energia,Conta de luz,Cemig,PIX,99.90"));
    }

    #[actix_rt::test]
    async fn test_invalid_filters_are_rejected() {
        let state = test_state().await;
        let query = FinancialQuery { kind: Some("REFUND".to_string()), ..Default::default() };
        let err = get_transactions(state.clone(), web::Query(query), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let query = FinancialQuery { start_date: Some(day(2025, 2, 1)), end_date: Some(day(2025, 1, 1)), ..Default::default() };
        let err = get_revenues(state.clone(), web::Query(query), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
