// src/maintenance_handlers.rs
//! Room maintenance orders and their effect on room status

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;
use validator::Validate;
use log::info;

use crate::AppState;
use crate::audit::{audit, audit_with_changes, ChangeSet};
use crate::auth::{require_scope, Scope};
use crate::error::{ApiError, ApiResult};
use crate::financial_handlers::{ensure_expense_category, record_expense, ExpenseEntry};
use crate::handlers::ApiResponse;
use crate::models::*;
use crate::room_handlers::set_room_status;
use crate::validation::clean_optional;

const MAINTENANCE_SELECT: &str = r#"
    SELECT m.*, r.number AS room_number
    FROM room_maintenance m
    JOIN rooms r ON r.id = m.room_id
"#;

async fn fetch_maintenance(pool: &SqlitePool, id: &str) -> ApiResult<RoomMaintenanceWithRoom> {
    let sql = format!("{} WHERE m.id = ?", MAINTENANCE_SELECT);
    sqlx::query_as::<_, RoomMaintenanceWithRoom>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Maintenance order"))
}

fn parse_priority(raw: Option<&str>) -> ApiResult<Priority> {
    parse_or_default(raw, Priority::parse, "priority")
}

/// Puts the room back in service once no other blocking order is in progress.
async fn release_room(conn: &mut SqliteConnection, order: &RoomMaintenance, user_id: &str) -> ApiResult<bool> {
    let (room_status,): (String,) = sqlx::query_as("SELECT status FROM rooms WHERE id = ?")
        .bind(&order.room_id)
        .fetch_one(&mut *conn)
        .await?;
    if RoomStatus::parse(&room_status) != Some(RoomStatus::Maintenance) {
        return Ok(false);
    }

    let (others,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM room_maintenance WHERE room_id = ? AND id != ? AND blocks_room = 1 AND status = 'IN_PROGRESS'"
    )
    .bind(&order.room_id)
    .bind(&order.id)
    .fetch_one(&mut *conn)
    .await?;
    if others > 0 {
        return Ok(false);
    }

    set_room_status(&mut *conn, &order.room_id, RoomStatus::Available, Some(user_id)).await?;
    Ok(true)
}

pub async fn get_maintenance_orders(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<MaintenanceQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Maintenance)?;

    let status = match query.status.as_deref() {
        Some(raw) => Some(
            MaintenanceStatus::parse(raw)
                .ok_or_else(|| ApiError::ValidationError(format!("Invalid maintenance status: '{}'", raw)))?
                .as_str(),
        ),
        None => None,
    };
    let priority = match query.priority.as_deref() {
        Some(raw) => Some(parse_priority(Some(raw))?.as_str()),
        None => None,
    };

    let sql = format!(
        r#"{}
        WHERE (?1 IS NULL OR m.status = ?1)
          AND (?2 IS NULL OR m.room_id = ?2)
          AND (?3 IS NULL OR m.priority = ?3)
        ORDER BY CASE m.priority WHEN 'URGENT' THEN 0 WHEN 'HIGH' THEN 1 WHEN 'MEDIUM' THEN 2 ELSE 3 END,
                 m.created_at DESC"#,
        MAINTENANCE_SELECT
    );
    let orders = sqlx::query_as::<_, RoomMaintenanceWithRoom>(&sql)
        .bind(status)
        .bind(&query.room_id)
        .bind(priority)
        .fetch_all(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(orders)))
}

pub async fn get_maintenance(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Maintenance)?;
    let order = fetch_maintenance(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(order)))
}

pub async fn create_maintenance(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateMaintenanceRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Maintenance)?;
    body.validate()?;
    let priority = parse_priority(body.priority.as_deref())?;

    let room: Option<(String,)> = sqlx::query_as("SELECT number FROM rooms WHERE id = ?")
        .bind(&body.room_id)
        .fetch_optional(&app_state.db_pool)
        .await?;
    let (room_number,) = room.ok_or_else(|| ApiError::not_found("Room"))?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO room_maintenance (id, room_id, title, description, priority, status, blocks_room,
                                      assigned_to, scheduled_for, cost, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 'PENDING', ?, ?, ?, ?, ?, ?, ?)
        "#
    )
    .bind(&id)
    .bind(&body.room_id)
    .bind(body.title.trim())
    .bind(clean_optional(&body.description))
    .bind(priority.as_str())
    .bind(body.blocks_room.unwrap_or(false))
    .bind(clean_optional(&body.assigned_to))
    .bind(body.scheduled_for)
    .bind(body.cost)
    .bind(&claims.sub)
    .bind(now)
    .bind(now)
    .execute(&app_state.db_pool)
    .await?;

    audit(&app_state.db_pool, &claims, "create", "maintenance", &id,
        &format!("Maintenance '{}' opened for room {} ({})", body.title.trim(), room_number, priority), &http_request).await;
    info!("🔧 Maintenance '{}' opened for room {}", body.title.trim(), room_number);

    let order = fetch_maintenance(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(order)))
}

pub async fn update_maintenance(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdateMaintenanceRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Maintenance)?;
    body.validate()?;
    let id = path.into_inner();
    let existing = fetch_maintenance(&app_state.db_pool, &id).await?.maintenance;

    if !existing.maintenance_status().is_open() {
        return Err(ApiError::Conflict(format!("A {} order can no longer be changed", existing.status)));
    }

    let title = body.title.as_deref().map(str::trim).map(str::to_string).unwrap_or_else(|| existing.title.clone());
    let description = clean_optional(&body.description).or_else(|| existing.description.clone());
    let priority = match body.priority.as_deref() {
        Some(raw) => parse_priority(Some(raw))?.as_str().to_string(),
        None => existing.priority.clone(),
    };
    let blocks_room = body.blocks_room.unwrap_or(existing.blocks_room);
    let assigned_to = clean_optional(&body.assigned_to).or_else(|| existing.assigned_to.clone());
    let scheduled_for = body.scheduled_for.or(existing.scheduled_for);
    let cost = body.cost.or(existing.cost);

    let mut tx = app_state.db_pool.begin().await?;
    sqlx::query(
        r#"
        UPDATE room_maintenance
        SET title = ?, description = ?, priority = ?, blocks_room = ?, assigned_to = ?, scheduled_for = ?, cost = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(&title)
    .bind(&description)
    .bind(&priority)
    .bind(blocks_room)
    .bind(&assigned_to)
    .bind(scheduled_for)
    .bind(cost)
    .bind(Utc::now())
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    // Blocking toggled on an order already in progress
    if existing.maintenance_status() == MaintenanceStatus::InProgress && blocks_room != existing.blocks_room {
        if blocks_room {
            set_room_status(&mut *tx, &existing.room_id, RoomStatus::Maintenance, Some(&claims.sub)).await?;
        } else {
            release_room(&mut tx, &existing, &claims.sub).await?;
        }
    }
    tx.commit().await?;

    let mut cs = ChangeSet::new();
    cs.add("title", &existing.title, &title);
    cs.add("priority", &existing.priority, &priority);
    cs.add("blocks_room", &existing.blocks_room, &blocks_room);
    cs.add_opt("assigned_to", &existing.assigned_to, &assigned_to);
    cs.add_opt("cost", &existing.cost, &cost);
    if !cs.is_empty() {
        audit_with_changes(&app_state.db_pool, &claims, "edit", "maintenance", &id,
            &format!("Maintenance '{}' updated: {}", title, cs.to_description()), &cs, &http_request).await;
    }

    let order = fetch_maintenance(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(order)))
}

pub async fn start_maintenance(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Maintenance)?;
    let id = path.into_inner();
    let order = fetch_maintenance(&app_state.db_pool, &id).await?;
    let current = order.maintenance.maintenance_status();
    if current != MaintenanceStatus::Pending {
        return Err(ApiError::invalid_transition("Maintenance", current.as_str(), MaintenanceStatus::InProgress.as_str()));
    }

    let now = Utc::now();
    let mut tx = app_state.db_pool.begin().await?;
    sqlx::query("UPDATE room_maintenance SET status = 'IN_PROGRESS', started_at = ?, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(now)
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    if order.maintenance.blocks_room {
        set_room_status(&mut *tx, &order.maintenance.room_id, RoomStatus::Maintenance, Some(&claims.sub)).await?;
    }
    tx.commit().await?;

    audit(&app_state.db_pool, &claims, "status", "maintenance", &id,
        &format!("Maintenance '{}' started in room {}", order.maintenance.title, order.room_number), &http_request).await;
    info!("🔧 Maintenance '{}' started (room {})", order.maintenance.title, order.room_number);

    let order = fetch_maintenance(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(order)))
}

/// Closes the order, books its cost as a "Manutenção" expense and releases the room.
pub async fn complete_maintenance(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: Option<web::Json<CompleteMaintenanceRequest>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Maintenance)?;
    let body = body.map(|b| b.into_inner()).unwrap_or_default();
    body.validate()?;
    let id = path.into_inner();
    let order = fetch_maintenance(&app_state.db_pool, &id).await?;
    let maintenance = &order.maintenance;
    let current = maintenance.maintenance_status();
    if !current.is_open() {
        return Err(ApiError::invalid_transition("Maintenance", current.as_str(), MaintenanceStatus::Completed.as_str()));
    }

    let cost = body.cost.or(maintenance.cost).map(round_cents);
    let now = Utc::now();
    let mut tx = app_state.db_pool.begin().await?;

    let expense_id = match cost {
        Some(amount) if amount > 0.0 => {
            let category_id = ensure_expense_category(&mut tx, MAINTENANCE_EXPENSE_CATEGORY).await?;
            let description = format!("Manutenção quarto {}: {}", order.room_number, maintenance.title);
            let notes = clean_optional(&body.notes);
            Some(record_expense(&mut tx, &ExpenseEntry {
                category_id: &category_id,
                description: &description,
                amount,
                expense_date: app_state.config.hotel.local_date(now),
                supplier: maintenance.assigned_to.as_deref(),
                notes: notes.as_deref(),
                maintenance_id: Some(&id),
                created_by: Some(&claims.sub),
                ..Default::default()
            }).await?)
        }
        _ => None,
    };

    sqlx::query(
        r#"
        UPDATE room_maintenance
        SET status = 'COMPLETED', completed_at = ?, started_at = COALESCE(started_at, ?), cost = ?, expense_id = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(now)
    .bind(now)
    .bind(cost)
    .bind(&expense_id)
    .bind(now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    let released = release_room(&mut tx, maintenance, &claims.sub).await?;
    tx.commit().await?;

    audit(&app_state.db_pool, &claims, "status", "maintenance", &id,
        &format!("Maintenance '{}' completed in room {}{}", maintenance.title, order.room_number,
            cost.map(|c| format!(", cost {:.2}", c)).unwrap_or_default()), &http_request).await;
    info!("🔧 Maintenance '{}' completed (room {}{})", maintenance.title, order.room_number,
        if released { ", back in service" } else { "" });

    let order = fetch_maintenance(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(order)))
}

pub async fn cancel_maintenance(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Maintenance)?;
    let id = path.into_inner();
    let order = fetch_maintenance(&app_state.db_pool, &id).await?;
    let current = order.maintenance.maintenance_status();
    if !current.is_open() {
        return Err(ApiError::invalid_transition("Maintenance", current.as_str(), MaintenanceStatus::Cancelled.as_str()));
    }

    let mut tx = app_state.db_pool.begin().await?;
    sqlx::query("UPDATE room_maintenance SET status = 'CANCELLED', updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    if current == MaintenanceStatus::InProgress && order.maintenance.blocks_room {
        release_room(&mut tx, &order.maintenance, &claims.sub).await?;
    }
    tx.commit().await?;

    audit(&app_state.db_pool, &claims, "status", "maintenance", &id,
        &format!("Maintenance '{}' cancelled", order.maintenance.title), &http_request).await;

    let order = fetch_maintenance(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(order)))
}

pub async fn delete_maintenance(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Maintenance)?;
    let id = path.into_inner();
    let order = fetch_maintenance(&app_state.db_pool, &id).await?;

    if order.maintenance.maintenance_status() == MaintenanceStatus::InProgress {
        return Err(ApiError::conflict("Maintenance is in progress; complete or cancel it first"));
    }

    sqlx::query("DELETE FROM room_maintenance WHERE id = ?")
        .bind(&id)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "delete", "maintenance", &id,
        &format!("Deleted maintenance '{}' of room {}", order.maintenance.title, order.room_number), &http_request).await;
    info!("🗑️ Maintenance '{}' deleted", order.maintenance.title);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Maintenance order deleted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;

    fn order_body(room_id: &str, blocks_room: bool) -> CreateMaintenanceRequest {
        CreateMaintenanceRequest {
            room_id: room_id.to_string(),
            title: "Trocar chuveiro".to_string(),
            description: None,
            priority: Some("high".to_string()),
            blocks_room: Some(blocks_room),
            assigned_to: Some("Eletricista João".to_string()),
            scheduled_for: None,
            cost: None,
        }
    }

    async fn room_status(state: &AppState, room_id: &str) -> String {
        let (status,): (String,) = sqlx::query_as("SELECT status FROM rooms WHERE id = ?")
            .bind(room_id)
            .fetch_one(&state.db_pool)
            .await
            .unwrap();
        status
    }

    async fn open_order(state: &web::Data<Arc<AppState>>, room_id: &str, blocks_room: bool) -> String {
        let resp = create_maintenance(state.clone(), web::Json(order_body(room_id, blocks_room)), owner_request()).await.unwrap();
        let body = response_json(resp).await;
        assert_eq!(body["data"]["priority"], "HIGH");
        body["data"]["id"].as_str().unwrap().to_string()
    }

    #[actix_rt::test]
    async fn test_blocking_order_takes_room_out_and_back() {
        let state = test_state().await;
        let room = seed_room(&state, "101", 2, 200.0).await;
        let order = open_order(&state, &room, true).await;
        assert_eq!(room_status(&state, &room).await, "AVAILABLE");

        start_maintenance(state.clone(), web::Path::from(order.clone()), owner_request()).await.unwrap();
        assert_eq!(room_status(&state, &room).await, "MAINTENANCE");

        let body = CompleteMaintenanceRequest { cost: Some(180.0), notes: None };
        let resp = complete_maintenance(state.clone(), web::Path::from(order.clone()), Some(web::Json(body)), owner_request())
            .await
            .unwrap();
        let json = response_json(resp).await;
        assert_eq!(json["data"]["status"], "COMPLETED");
        assert!(json["data"]["completed_at"].is_string());
        assert_eq!(room_status(&state, &room).await, "AVAILABLE");

        let expense: (f64, String) = sqlx::query_as(
            "SELECT e.amount, c.name FROM expenses e JOIN expense_categories c ON c.id = e.category_id WHERE e.maintenance_id = ?"
        )
        .bind(&order)
        .fetch_one(&state.db_pool)
        .await
        .unwrap();
        assert_eq!(expense, (180.0, MAINTENANCE_EXPENSE_CATEGORY.to_string()));

        let err = start_maintenance(state.clone(), web::Path::from(order), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[actix_rt::test]
    async fn test_non_blocking_order_leaves_room_alone() {
        let state = test_state().await;
        let room = seed_room(&state, "102", 2, 200.0).await;
        let order = open_order(&state, &room, false).await;

        start_maintenance(state.clone(), web::Path::from(order.clone()), owner_request()).await.unwrap();
        assert_eq!(room_status(&state, &room).await, "AVAILABLE");

        complete_maintenance(state.clone(), web::Path::from(order), None, owner_request()).await.unwrap();
        let expenses: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM expenses").fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(expenses.0, 0);
    }

    #[actix_rt::test]
    async fn test_room_stays_blocked_while_another_order_runs() {
        let state = test_state().await;
        let room = seed_room(&state, "103", 2, 200.0).await;
        let first = open_order(&state, &room, true).await;
        let second = open_order(&state, &room, true).await;

        start_maintenance(state.clone(), web::Path::from(first.clone()), owner_request()).await.unwrap();
        start_maintenance(state.clone(), web::Path::from(second.clone()), owner_request()).await.unwrap();

        let err = delete_maintenance(state.clone(), web::Path::from(first.clone()), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        cancel_maintenance(state.clone(), web::Path::from(first), owner_request()).await.unwrap();
        assert_eq!(room_status(&state, &room).await, "MAINTENANCE");

        complete_maintenance(state.clone(), web::Path::from(second), None, owner_request()).await.unwrap();
        assert_eq!(room_status(&state, &room).await, "AVAILABLE");
    }

    #[actix_rt::test]
    async fn test_invalid_priority_rejected() {
        let state = test_state().await;
        let room = seed_room(&state, "104", 2, 200.0).await;
        let mut body = order_body(&room, false);
        body.priority = Some("whenever".to_string());
        let err = create_maintenance(state.clone(), web::Json(body), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let query = MaintenanceQuery { status: Some("bogus".to_string()), ..Default::default() };
        let err = get_maintenance_orders(state.clone(), web::Query(query), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
