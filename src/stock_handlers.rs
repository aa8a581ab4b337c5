// src/stock_handlers.rs
//! Stock: categories, items, movements and purchases

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;
use validator::Validate;
use log::{info, warn};

use crate::AppState;
use crate::audit::{audit, audit_with_changes, ChangeSet};
use crate::auth::{require_scope, Scope};
use crate::error::{ApiError, ApiResult};
use crate::financial_handlers::{ensure_expense_category, record_expense, ExpenseEntry};
use crate::handlers::ApiResponse;
use crate::models::*;
use crate::validation::{clean_optional, escape_like_pattern};

const ITEM_VIEW_SELECT: &str = r#"
    SELECT i.*, c.name AS category_name, (i.current_stock < i.minimum_stock) AS is_low_stock
    FROM stock_items i
    JOIN stock_categories c ON c.id = i.category_id
"#;

// ==================== CATEGORIES ====================

async fn fetch_category(pool: &SqlitePool, id: &str) -> ApiResult<StockCategory> {
    sqlx::query_as::<_, StockCategory>("SELECT * FROM stock_categories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Stock category"))
}

async fn ensure_unique_category(pool: &SqlitePool, name: &str, exclude_id: &str) -> ApiResult<()> {
    let duplicate: Option<(String,)> = sqlx::query_as("SELECT id FROM stock_categories WHERE name = ? COLLATE NOCASE AND id != ?")
        .bind(name)
        .bind(exclude_id)
        .fetch_optional(pool)
        .await?;
    if duplicate.is_some() {
        return Err(ApiError::Conflict(format!("Stock category '{}' already exists", name)));
    }
    Ok(())
}

pub async fn get_stock_categories(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Stock)?;
    let categories = sqlx::query_as::<_, StockCategory>("SELECT * FROM stock_categories ORDER BY name")
        .fetch_all(&app_state.db_pool)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(categories)))
}

pub async fn create_stock_category(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateStockCategoryRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Stock)?;
    body.validate()?;
    let name = body.name.trim();
    ensure_unique_category(&app_state.db_pool, name, "").await?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query("INSERT INTO stock_categories (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(clean_optional(&body.description))
        .bind(now)
        .bind(now)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "create", "stock_category", &id,
        &format!("Created stock category '{}'", name), &http_request).await;
    let category = fetch_category(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(category)))
}

pub async fn update_stock_category(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdateStockCategoryRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Stock)?;
    body.validate()?;
    let id = path.into_inner();
    let existing = fetch_category(&app_state.db_pool, &id).await?;

    let name = body.name.as_deref().map(str::trim).map(str::to_string).unwrap_or_else(|| existing.name.clone());
    if name != existing.name {
        ensure_unique_category(&app_state.db_pool, &name, &id).await?;
    }
    let description = clean_optional(&body.description).or_else(|| existing.description.clone());

    sqlx::query("UPDATE stock_categories SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(Utc::now())
        .bind(&id)
        .execute(&app_state.db_pool)
        .await?;

    let mut cs = ChangeSet::new();
    cs.add("name", &existing.name, &name);
    cs.add_opt("description", &existing.description, &description);
    if !cs.is_empty() {
        audit_with_changes(&app_state.db_pool, &claims, "edit", "stock_category", &id,
            &format!("Stock category '{}' updated", name), &cs, &http_request).await;
    }

    let category = fetch_category(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(category)))
}

pub async fn delete_stock_category(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Stock)?;
    let id = path.into_inner();
    let category = fetch_category(&app_state.db_pool, &id).await?;

    let items: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stock_items WHERE category_id = ?")
        .bind(&id)
        .fetch_one(&app_state.db_pool)
        .await?;
    if items.0 > 0 {
        return Err(ApiError::Conflict(format!(
            "Category '{}' still has {} item(s)", category.name, items.0
        )));
    }

    sqlx::query("DELETE FROM stock_categories WHERE id = ?")
        .bind(&id)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "delete", "stock_category", &id,
        &format!("Deleted stock category '{}'", category.name), &http_request).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Category deleted".to_string())))
}

// ==================== ITEMS ====================

async fn fetch_item_view(pool: &SqlitePool, id: &str) -> ApiResult<StockItemView> {
    let sql = format!("{} WHERE i.id = ?", ITEM_VIEW_SELECT);
    sqlx::query_as::<_, StockItemView>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Stock item"))
}

pub async fn get_stock_items(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<StockItemQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Stock)?;

    let pattern = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", escape_like_pattern(s)));

    let sql = format!(
        r#"{}
        WHERE (?1 IS NULL OR i.category_id = ?1)
          AND (?2 IS NULL OR i.name LIKE ?2 ESCAPE '\')
          AND (?3 = 0 OR i.current_stock < i.minimum_stock)
        ORDER BY c.name, i.name"#,
        ITEM_VIEW_SELECT
    );
    let items = sqlx::query_as::<_, StockItemView>(&sql)
        .bind(&query.category_id)
        .bind(&pattern)
        .bind(query.low_stock.unwrap_or(false))
        .fetch_all(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(items)))
}

pub async fn load_low_stock(pool: &SqlitePool) -> ApiResult<Vec<StockItemView>> {
    let sql = format!(
        "{} WHERE i.current_stock < i.minimum_stock ORDER BY (i.minimum_stock - i.current_stock) DESC, i.name",
        ITEM_VIEW_SELECT
    );
    let items = sqlx::query_as::<_, StockItemView>(&sql).fetch_all(pool).await?;
    Ok(items)
}

pub async fn get_low_stock_items(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Stock)?;
    let items = load_low_stock(&app_state.db_pool).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(items)))
}

pub async fn get_stock_item(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Stock)?;
    let item = fetch_item_view(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(item)))
}

pub async fn create_stock_item(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateStockItemRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Stock)?;
    body.validate()?;
    fetch_category(&app_state.db_pool, &body.category_id).await?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let initial_stock = body.current_stock.unwrap_or(0.0);

    let mut tx = app_state.db_pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO stock_items (id, category_id, name, unit, current_stock, minimum_stock, unit_cost,
                                 location, notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    )
    .bind(&id)
    .bind(&body.category_id)
    .bind(body.name.trim())
    .bind(body.unit.trim())
    .bind(initial_stock)
    .bind(body.minimum_stock.unwrap_or(0.0))
    .bind(body.unit_cost)
    .bind(clean_optional(&body.location))
    .bind(clean_optional(&body.notes))
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    if initial_stock > 0.0 {
        insert_movement(&mut tx, &MovementRow {
            item_id: &id,
            movement_type: MovementType::In,
            quantity: initial_stock,
            previous_stock: 0.0,
            new_stock: initial_stock,
            reason: Some("Estoque inicial"),
            purchase_id: None,
            created_by: Some(&claims.sub),
        }).await?;
    }
    tx.commit().await?;

    audit(&app_state.db_pool, &claims, "create", "stock_item", &id,
        &format!("Created stock item '{}'", body.name.trim()), &http_request).await;
    info!("📦 Stock item '{}' created", body.name.trim());

    let item = fetch_item_view(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(item)))
}

pub async fn update_stock_item(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdateStockItemRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Stock)?;
    body.validate()?;
    let id = path.into_inner();
    let existing = fetch_item_view(&app_state.db_pool, &id).await?.item;

    let category_id = body.category_id.clone().unwrap_or_else(|| existing.category_id.clone());
    if category_id != existing.category_id {
        fetch_category(&app_state.db_pool, &category_id).await?;
    }
    let name = body.name.as_deref().map(str::trim).map(str::to_string).unwrap_or_else(|| existing.name.clone());
    let unit = body.unit.as_deref().map(str::trim).map(str::to_string).unwrap_or_else(|| existing.unit.clone());
    let minimum_stock = body.minimum_stock.unwrap_or(existing.minimum_stock);
    let unit_cost = body.unit_cost.or(existing.unit_cost);
    let location = clean_optional(&body.location).or_else(|| existing.location.clone());
    let notes = clean_optional(&body.notes).or_else(|| existing.notes.clone());

    sqlx::query(
        r#"
        UPDATE stock_items
        SET category_id = ?, name = ?, unit = ?, minimum_stock = ?, unit_cost = ?, location = ?, notes = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(&category_id)
    .bind(&name)
    .bind(&unit)
    .bind(minimum_stock)
    .bind(unit_cost)
    .bind(&location)
    .bind(&notes)
    .bind(Utc::now())
    .bind(&id)
    .execute(&app_state.db_pool)
    .await?;

    let mut cs = ChangeSet::new();
    cs.add("category_id", &existing.category_id, &category_id);
    cs.add("name", &existing.name, &name);
    cs.add("unit", &existing.unit, &unit);
    cs.add("minimum_stock", &existing.minimum_stock, &minimum_stock);
    cs.add_opt("unit_cost", &existing.unit_cost, &unit_cost);
    if !cs.is_empty() {
        audit_with_changes(&app_state.db_pool, &claims, "edit", "stock_item", &id,
            &format!("Stock item '{}' updated: {}", name, cs.to_description()), &cs, &http_request).await;
    }

    let item = fetch_item_view(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(item)))
}

pub async fn delete_stock_item(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Stock)?;
    let id = path.into_inner();
    let item = fetch_item_view(&app_state.db_pool, &id).await?.item;

    let purchases: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stock_purchases WHERE item_id = ?")
        .bind(&id)
        .fetch_one(&app_state.db_pool)
        .await?;
    if purchases.0 > 0 {
        return Err(ApiError::Conflict(format!(
            "Item '{}' has {} purchase(s) on record", item.name, purchases.0
        )));
    }

    sqlx::query("DELETE FROM stock_items WHERE id = ?")
        .bind(&id)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "delete", "stock_item", &id,
        &format!("Deleted stock item '{}'", item.name), &http_request).await;
    info!("🗑️ Stock item '{}' deleted", item.name);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Item deleted".to_string())))
}

// ==================== MOVEMENTS ====================

struct MovementRow<'a> {
    item_id: &'a str,
    movement_type: MovementType,
    quantity: f64,
    previous_stock: f64,
    new_stock: f64,
    reason: Option<&'a str>,
    purchase_id: Option<&'a str>,
    created_by: Option<&'a str>,
}

async fn insert_movement(conn: &mut SqliteConnection, row: &MovementRow<'_>) -> ApiResult<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO stock_movements (id, item_id, movement_type, quantity, previous_stock, new_stock,
                                     reason, purchase_id, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    )
    .bind(&id)
    .bind(row.item_id)
    .bind(row.movement_type.as_str())
    .bind(row.quantity)
    .bind(row.previous_stock)
    .bind(row.new_stock)
    .bind(row.reason)
    .bind(row.purchase_id)
    .bind(row.created_by)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(id)
}

/// Applies a movement with a compare-and-set on `current_stock` and logs it.
/// Returns the new stock level.
pub async fn apply_movement(
    conn: &mut SqliteConnection,
    item_id: &str,
    movement_type: MovementType,
    quantity: f64,
    reason: Option<&str>,
    purchase_id: Option<&str>,
    created_by: Option<&str>,
) -> ApiResult<f64> {
    if !quantity.is_finite() || quantity < 0.0 {
        return Err(ApiError::validation("Quantity cannot be negative"));
    }
    if movement_type != MovementType::Adjustment && quantity == 0.0 {
        return Err(ApiError::validation("Quantity must be positive"));
    }

    let (name, previous): (String, f64) = sqlx::query_as("SELECT name, current_stock FROM stock_items WHERE id = ?")
        .bind(item_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::not_found("Stock item"))?;

    let new_stock = movement_type.apply(previous, quantity).ok_or_else(|| {
        ApiError::ValidationError(format!(
            "Cannot remove {} from '{}': only {} in stock", quantity, name, previous
        ))
    })?;

    let result = sqlx::query("UPDATE stock_items SET current_stock = ?, updated_at = ? WHERE id = ? AND current_stock = ?")
        .bind(new_stock)
        .bind(Utc::now())
        .bind(item_id)
        .bind(previous)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Stock level changed concurrently, try again"));
    }

    insert_movement(conn, &MovementRow {
        item_id,
        movement_type,
        quantity,
        previous_stock: previous,
        new_stock,
        reason,
        purchase_id,
        created_by,
    }).await?;

    Ok(new_stock)
}

pub async fn adjust_stock(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<AdjustStockRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Stock)?;
    body.validate()?;
    let item_id = path.into_inner();
    let movement_type = MovementType::parse(&body.movement_type).ok_or_else(|| {
        ApiError::ValidationError("Invalid movement type. Must be: IN, OUT or ADJUSTMENT".to_string())
    })?;
    let reason = clean_optional(&body.reason);

    let mut tx = app_state.db_pool.begin().await?;
    let new_stock = apply_movement(&mut tx, &item_id, movement_type, body.quantity,
        reason.as_deref(), None, Some(&claims.sub)).await?;
    tx.commit().await?;

    let item = fetch_item_view(&app_state.db_pool, &item_id).await?;
    audit(&app_state.db_pool, &claims, "adjust", "stock_item", &item_id,
        &format!("{} {} {} of '{}' (now {})", movement_type, body.quantity, item.item.unit, item.item.name, new_stock),
        &http_request).await;
    if item.item.is_low_stock() {
        warn!("📦 '{}' is below its minimum stock ({} < {})", item.item.name, new_stock, item.item.minimum_stock);
    }
    Ok(HttpResponse::Ok().json(ApiResponse::success(item)))
}

pub async fn get_stock_movements(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Stock)?;
    let item_id = path.into_inner();
    fetch_item_view(&app_state.db_pool, &item_id).await?;

    let movements = sqlx::query_as::<_, StockMovement>(
        "SELECT * FROM stock_movements WHERE item_id = ? ORDER BY created_at DESC"
    )
    .bind(&item_id)
    .fetch_all(&app_state.db_pool)
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(movements)))
}

// ==================== PURCHASES ====================

pub async fn get_stock_purchases(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Stock)?;
    let purchases = sqlx::query_as::<_, StockPurchaseWithItem>(
        r#"
        SELECT p.*, i.name AS item_name
        FROM stock_purchases p
        JOIN stock_items i ON i.id = p.item_id
        ORDER BY p.purchase_date DESC, p.created_at DESC
        "#
    )
    .fetch_all(&app_state.db_pool)
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(purchases)))
}

/// Stock entry, IN movement and "Estoque" expense are written together.
pub async fn create_stock_purchase(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateStockPurchaseRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Stock)?;
    body.validate()?;
    let item = fetch_item_view(&app_state.db_pool, &body.item_id).await?.item;

    let purchase_date = body.purchase_date.unwrap_or_else(|| app_state.config.hotel.local_date(Utc::now()));
    let total_cost = round_cents(body.quantity * body.unit_cost);
    let supplier = clean_optional(&body.supplier);
    let notes = clean_optional(&body.notes);
    let id = Uuid::new_v4().to_string();

    let mut tx = app_state.db_pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO stock_purchases (id, item_id, quantity, unit_cost, total_cost, supplier, purchase_date,
                                     notes, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    )
    .bind(&id)
    .bind(&item.id)
    .bind(body.quantity)
    .bind(body.unit_cost)
    .bind(total_cost)
    .bind(&supplier)
    .bind(purchase_date)
    .bind(&notes)
    .bind(&claims.sub)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    let reason = format!("Compra {}", purchase_date.format("%d/%m/%Y"));
    apply_movement(&mut tx, &item.id, MovementType::In, body.quantity, Some(&reason), Some(&id), Some(&claims.sub)).await?;

    if total_cost > 0.0 {
        let category_id = ensure_expense_category(&mut tx, STOCK_EXPENSE_CATEGORY).await?;
        let description = format!("Compra de {} {} de {}", body.quantity, item.unit, item.name);
        let expense_id = record_expense(&mut tx, &ExpenseEntry {
            category_id: &category_id,
            description: &description,
            amount: total_cost,
            expense_date: purchase_date,
            supplier: supplier.as_deref(),
            notes: notes.as_deref(),
            purchase_id: Some(&id),
            created_by: Some(&claims.sub),
            ..Default::default()
        }).await?;

        sqlx::query("UPDATE stock_purchases SET expense_id = ? WHERE id = ?")
            .bind(&expense_id)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("UPDATE stock_items SET unit_cost = ? WHERE id = ?")
        .bind(body.unit_cost)
        .bind(&item.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&app_state.db_pool, &claims, "purchase", "stock_item", &item.id,
        &format!("Purchased {} {} of '{}' for {:.2}", body.quantity, item.unit, item.name, total_cost), &http_request).await;
    info!("📦 Purchase of {} {} of '{}' ({:.2})", body.quantity, item.unit, item.name, total_cost);

    let purchase = sqlx::query_as::<_, StockPurchaseWithItem>(
        "SELECT p.*, i.name AS item_name FROM stock_purchases p JOIN stock_items i ON i.id = p.item_id WHERE p.id = ?"
    )
    .bind(&id)
    .fetch_one(&app_state.db_pool)
    .await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(purchase)))
}
