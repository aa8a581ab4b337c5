// src/room_handlers.rs
//! Rooms: CRUD, stored status and the derived occupancy views

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use crate::AppState;
use crate::audit::{audit, audit_with_changes, ChangeSet};
use crate::auth::{get_current_user, require_scope, Scope};
use crate::models::{
    AvailabilityQuery, CreateRoomRequest, Room, RoomStatus, RoomWithStatus, UpdateRoomRequest,
    UpdateRoomStatusRequest, ROOM_HOLDING_STATUSES,
};
use crate::occupancy::{self, resolve_rooms, StatusCounts};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::validation::{clean_optional, validate_date_range};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;
use log::info;

async fn fetch_room(pool: &SqlitePool, room_id: &str) -> ApiResult<Room> {
    sqlx::query_as::<_, Room>("SELECT * FROM rooms WHERE id = ?")
        .bind(room_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Room"))
}

fn parse_room_status(raw: &str) -> ApiResult<RoomStatus> {
    RoomStatus::parse(raw).ok_or_else(|| {
        ApiError::ValidationError(
            "Invalid status. Must be: AVAILABLE, OCCUPIED, CLEANING, MAINTENANCE or BLOCKED".to_string(),
        )
    })
}

async fn ensure_unique_number(pool: &SqlitePool, number: &str, exclude_id: Option<&str>) -> ApiResult<()> {
    let duplicate: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM rooms WHERE LOWER(number) = LOWER(?) AND id != ?"
    )
    .bind(number.trim())
    .bind(exclude_id.unwrap_or(""))
    .fetch_optional(pool)
    .await?;

    if duplicate.is_some() {
        return Err(ApiError::conflict("Room with this number already exists"));
    }
    Ok(())
}

/// Rooms that can take a new stay in `[check_in, check_out)`: in service, large
/// enough, and with no room-holding booking overlapping the range.
pub async fn find_available_rooms(
    pool: &SqlitePool,
    check_in: DateTime<Utc>,
    check_out: DateTime<Utc>,
    guests: i64,
) -> ApiResult<Vec<Room>> {
    let sql = format!(
        r#"
        SELECT r.* FROM rooms r
        WHERE r.status NOT IN ('MAINTENANCE', 'BLOCKED')
          AND r.capacity >= ?
          AND NOT EXISTS (
              SELECT 1 FROM bookings b
              WHERE b.room_id = r.id
                AND b.status IN ({})
                AND b.check_in < ?
                AND b.check_out > ?
          )
        ORDER BY r.daily_rate ASC, r.number ASC
        "#,
        ROOM_HOLDING_STATUSES
    );

    let rooms = sqlx::query_as::<_, Room>(&sql)
        .bind(guests)
        .bind(check_out)
        .bind(check_in)
        .fetch_all(pool)
        .await?;

    Ok(rooms)
}

// ==================== GET ALL ROOMS ====================

pub async fn get_all_rooms(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let rooms = occupancy::rooms_with_status(&app_state.db_pool, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(rooms)))
}

// ==================== STATUS COUNTS ====================

/// Counts per effective status. Falls back to zeros if the query fails.
pub async fn get_room_status_counts(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;

    let counts = match occupancy::status_counts(&app_state.db_pool, Utc::now()).await {
        Ok(counts) => counts,
        Err(e) => {
            log::error!("Failed to compute room status counts: {}", e);
            StatusCounts::default()
        }
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(counts)))
}

// ==================== AVAILABILITY ====================

pub async fn get_available_rooms(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<AvailabilityQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    validate_date_range(query.check_in, query.check_out, "Stay")?;

    let rooms = find_available_rooms(
        &app_state.db_pool,
        query.check_in,
        query.check_out,
        query.guests.unwrap_or(1).max(1),
    )
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(rooms)))
}

// ==================== GET ROOM BY ID ====================

pub async fn get_room(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let room_id = path.into_inner();
    let room = fetch_room(&app_state.db_pool, &room_id).await?;

    let now = Utc::now();
    let active: Vec<_> = occupancy::load_active_bookings(&app_state.db_pool, now)
        .await?
        .into_iter()
        .filter(|b| b.room_id == room_id)
        .collect();

    let resolved: Option<RoomWithStatus> = resolve_rooms(vec![room], active, now).into_iter().next();
    let resolved = resolved.ok_or_else(|| ApiError::not_found("Room"))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(resolved)))
}

// ==================== CREATE ROOM ====================

pub async fn create_room(
    app_state: web::Data<Arc<AppState>>,
    room: web::Json<CreateRoomRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Rooms)?;
    room.validate()?;

    let status = match room.status.as_deref() {
        Some(raw) => parse_room_status(raw)?,
        None => RoomStatus::Available,
    };
    let number = room.number.trim().to_string();
    ensure_unique_number(&app_state.db_pool, &number, None).await?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO rooms (id, number, name, category, capacity, daily_rate, floor, description, amenities,
                           status, created_by, updated_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    )
    .bind(&id)
    .bind(&number)
    .bind(room.name.trim())
    .bind(room.category.trim().to_uppercase())
    .bind(room.capacity)
    .bind(room.daily_rate)
    .bind(room.floor)
    .bind(clean_optional(&room.description))
    .bind(clean_optional(&room.amenities))
    .bind(status.as_str())
    .bind(&claims.sub)
    .bind(&claims.sub)
    .bind(now)
    .bind(now)
    .execute(&app_state.db_pool)
    .await?;

    let created = fetch_room(&app_state.db_pool, &id).await?;

    audit(&app_state.db_pool, &claims, "create", "room", &id,
        &format!("Created room {} ({})", created.number, created.name), &http_request).await;
    info!("🚪 Created room: {} ({})", created.number, id);
    Ok(HttpResponse::Created().json(ApiResponse::success(created)))
}

// ==================== UPDATE ROOM ====================

pub async fn update_room(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    update: web::Json<UpdateRoomRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Rooms)?;
    update.validate()?;
    let room_id = path.into_inner();

    let existing = fetch_room(&app_state.db_pool, &room_id).await?;

    if let Some(ref new_number) = update.number {
        if new_number.trim().to_lowercase() != existing.number.to_lowercase() {
            ensure_unique_number(&app_state.db_pool, new_number, Some(&room_id)).await?;
        }
    }

    let status = match update.status.as_deref() {
        Some(raw) => parse_room_status(raw)?.as_str().to_string(),
        None => existing.status.clone(),
    };

    let number = update.number.as_ref().map(|n| n.trim().to_string()).unwrap_or_else(|| existing.number.clone());
    let name = update.name.as_ref().map(|n| n.trim().to_string()).unwrap_or_else(|| existing.name.clone());
    let category = update.category.as_ref().map(|c| c.trim().to_uppercase()).unwrap_or_else(|| existing.category.clone());
    let capacity = update.capacity.unwrap_or(existing.capacity);
    let daily_rate = update.daily_rate.unwrap_or(existing.daily_rate);
    let floor = update.floor.or(existing.floor);
    let description = clean_optional(&update.description).or_else(|| existing.description.clone());
    let amenities = clean_optional(&update.amenities).or_else(|| existing.amenities.clone());

    let mut cs = ChangeSet::new();
    cs.add("number", &existing.number, &number);
    cs.add("name", &existing.name, &name);
    cs.add("category", &existing.category, &category);
    cs.add("capacity", &existing.capacity, &capacity);
    cs.add("daily_rate", &existing.daily_rate, &daily_rate);
    cs.add("status", &existing.status, &status);

    sqlx::query(
        r#"
        UPDATE rooms
        SET number = ?, name = ?, category = ?, capacity = ?, daily_rate = ?, floor = ?,
            description = ?, amenities = ?, status = ?, updated_by = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(&number)
    .bind(&name)
    .bind(&category)
    .bind(capacity)
    .bind(daily_rate)
    .bind(floor)
    .bind(&description)
    .bind(&amenities)
    .bind(&status)
    .bind(&claims.sub)
    .bind(Utc::now())
    .bind(&room_id)
    .execute(&app_state.db_pool)
    .await?;

    let updated = fetch_room(&app_state.db_pool, &room_id).await?;

    audit_with_changes(&app_state.db_pool, &claims, "edit", "room", &room_id,
        &format!("Room {} updated: {}", updated.number, cs.to_description()), &cs, &http_request).await;
    info!("🚪 Updated room: {} ({})", updated.number, room_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success(updated)))
}

// ==================== UPDATE ROOM STATUS ====================

pub async fn update_room_status(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdateRoomStatusRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Rooms)?;
    let room_id = path.into_inner();
    let status = parse_room_status(&body.status)?;

    let existing = fetch_room(&app_state.db_pool, &room_id).await?;
    set_room_status(&app_state.db_pool, &room_id, status, Some(&claims.sub)).await?;
    let updated = fetch_room(&app_state.db_pool, &room_id).await?;

    audit(&app_state.db_pool, &claims, "status", "room", &room_id,
        &format!("Room {} status: {} → {}", updated.number, existing.status, status), &http_request).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(updated)))
}

/// Writes the stored status; used by check-in/out and maintenance too.
pub async fn set_room_status<'e, E>(executor: E, room_id: &str, status: RoomStatus, user_id: Option<&str>) -> ApiResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query("UPDATE rooms SET status = ?, updated_by = COALESCE(?, updated_by), updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(user_id)
        .bind(Utc::now())
        .bind(room_id)
        .execute(executor)
        .await?;
    Ok(())
}

// ==================== DELETE ROOM ====================

pub async fn delete_room(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Rooms)?;
    let room_id = path.into_inner();
    let room = fetch_room(&app_state.db_pool, &room_id).await?;

    let bookings: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bookings WHERE room_id = ?")
        .bind(&room_id)
        .fetch_one(&app_state.db_pool)
        .await?;

    if bookings.0 > 0 {
        return Err(ApiError::Conflict(format!(
            "Cannot delete room {}: it has {} booking(s)", room.number, bookings.0
        )));
    }

    sqlx::query("DELETE FROM rooms WHERE id = ?")
        .bind(&room_id)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "delete", "room", &room_id,
        &format!("Deleted room {} ({})", room.number, room.name), &http_request).await;
    info!("🗑️ Deleted room: {} ({})", room.number, room_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Room deleted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;
    use chrono::Duration;

    fn new_room(number: &str) -> CreateRoomRequest {
        CreateRoomRequest {
            number: number.to_string(),
            name: "Suíte Jardim".to_string(),
            category: "suite".to_string(),
            capacity: 3,
            daily_rate: 420.0,
            floor: Some(1),
            description: Some("Vista para o jardim".to_string()),
            amenities: None,
            status: None,
        }
    }

    #[actix_rt::test]
    async fn test_create_room_and_reject_duplicate_number() {
        let state = test_state().await;

        let resp = create_room(state.clone(), web::Json(new_room("12A")), owner_request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = response_json(resp).await;
        assert_eq!(body["data"]["category"], "SUITE");
        assert_eq!(body["data"]["status"], "AVAILABLE");

        let err = create_room(state.clone(), web::Json(new_room("12a")), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[actix_rt::test]
    async fn test_room_writes_require_rooms_scope() {
        let state = test_state().await;
        let err = create_room(state.clone(), web::Json(new_room("1")), staff_request(vec![Scope::Bookings]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let ok = create_room(state.clone(), web::Json(new_room("1")), staff_request(vec![Scope::Rooms])).await;
        assert!(ok.is_ok());
    }

    #[actix_rt::test]
    async fn test_listing_and_counts_share_effective_status() {
        let state = test_state().await;
        let now = now_secs();
        let occupied = seed_room(&state, "101", 2, 300.0).await;
        seed_room(&state, "102", 2, 300.0).await;
        let guest = seed_guest(&state, "Maria Silva", None).await;
        seed_booking(&state, &occupied, &guest, now - Duration::days(1), now + Duration::days(1), "CHECKED_IN").await;

        let list = response_json(get_all_rooms(state.clone(), owner_request()).await.unwrap()).await;
        let rooms = list["data"].as_array().unwrap();
        let room_101 = rooms.iter().find(|r| r["number"] == "101").unwrap();
        assert_eq!(room_101["status"], "AVAILABLE");
        assert_eq!(room_101["effective_status"], "OCCUPIED");
        assert_eq!(room_101["active_booking"]["guest_name"], "Maria Silva");

        let counts = response_json(get_room_status_counts(state.clone(), owner_request()).await.unwrap()).await;
        assert_eq!(counts["data"]["occupied"], 1);
        assert_eq!(counts["data"]["available"], 1);
        assert_eq!(counts["data"]["occupancy_rate"], 50.0);
    }

    #[actix_rt::test]
    async fn test_status_counts_zeroed_when_query_fails() {
        let state = test_state().await;
        sqlx::query("PRAGMA foreign_keys = OFF").execute(&state.db_pool).await.unwrap();
        sqlx::query("DROP TABLE bookings").execute(&state.db_pool).await.unwrap();

        let resp = get_room_status_counts(state.clone(), owner_request()).await.unwrap();
        let body = response_json(resp).await;
        assert_eq!(body["data"]["total"], 0);
        assert_eq!(body["data"]["occupancy_rate"], 0.0);
    }

    #[actix_rt::test]
    async fn test_availability_excludes_overlaps_and_out_of_service_rooms() {
        let state = test_state().await;
        let now = now_secs();
        let booked = seed_room(&state, "201", 2, 250.0).await;
        let free = seed_room(&state, "202", 2, 250.0).await;
        let small = seed_room(&state, "203", 1, 150.0).await;
        let blocked = seed_room(&state, "204", 4, 500.0).await;
        set_room_status(&state.db_pool, &blocked, RoomStatus::Blocked, None).await.unwrap();

        let guest = seed_guest(&state, "João Pereira", None).await;
        seed_booking(&state, &booked, &guest, now + Duration::days(2), now + Duration::days(5), "PRE_BOOKING").await;

        let rooms = find_available_rooms(&state.db_pool, now + Duration::days(4), now + Duration::days(6), 2)
            .await
            .unwrap();
        let ids: Vec<&str> = rooms.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![free.as_str()]);
        assert!(!ids.contains(&small.as_str()));

        // Back-to-back stays do not overlap
        let rooms = find_available_rooms(&state.db_pool, now + Duration::days(5), now + Duration::days(6), 1)
            .await
            .unwrap();
        assert!(rooms.iter().any(|r| r.id == booked));
    }

    #[actix_rt::test]
    async fn test_delete_room_with_bookings_is_rejected() {
        let state = test_state().await;
        let now = now_secs();
        let room = seed_room(&state, "301", 2, 200.0).await;
        let guest = seed_guest(&state, "Ana Costa", None).await;
        seed_booking(&state, &room, &guest, now, now + Duration::days(1), "CANCELLED").await;

        let err = delete_room(state.clone(), web::Path::from(room.clone()), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let empty = seed_room(&state, "302", 2, 200.0).await;
        assert!(delete_room(state.clone(), web::Path::from(empty), owner_request()).await.is_ok());
    }

    #[actix_rt::test]
    async fn test_update_room_status_validates_value() {
        let state = test_state().await;
        let room = seed_room(&state, "401", 2, 200.0).await;

        let err = update_room_status(
            state.clone(),
            web::Path::from(room.clone()),
            web::Json(UpdateRoomStatusRequest { status: "RESERVED".to_string() }),
            owner_request(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = update_room_status(
            state.clone(),
            web::Path::from(room),
            web::Json(UpdateRoomStatusRequest { status: "cleaning".to_string() }),
            owner_request(),
        )
        .await
        .unwrap();
        assert_eq!(response_json(resp).await["data"]["status"], "CLEANING");
    }
}
