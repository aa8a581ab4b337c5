// src/booking_handlers.rs
//! Bookings: creation with overlap and capacity checks, status transitions and payments

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;
use validator::Validate;
use log::info;

use crate::AppState;
use crate::audit::{audit, audit_with_changes, ChangeSet};
use crate::auth::{require_scope, Scope};
use crate::error::{ApiError, ApiResult};
use crate::financial_handlers::{record_revenue, RevenueEntry};
use crate::handlers::{ApiResponse, PaginatedResponse, PaginationQuery};
use crate::models::*;
use crate::room_handlers::set_room_status;
use crate::validation::{clean_optional, validate_date_range};

const BOOKING_DETAILS_SELECT: &str = r#"
    SELECT b.*, r.number AS room_number, r.name AS room_name, g.name AS guest_name, g.phone AS guest_phone
    FROM bookings b
    JOIN rooms r ON r.id = b.room_id
    JOIN guests g ON g.id = b.guest_id
"#;

// ==================== SHARED BOOKING RULES ====================

/// Everything needed to create a booking from the admin, a quote or the public site.
#[derive(Debug, Clone)]
pub struct NewBooking<'a> {
    pub room_id: &'a str,
    pub guest_id: &'a str,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub adults: i64,
    pub children: i64,
    pub total_amount: Option<f64>,
    pub status: BookingStatus,
    pub source: &'a str,
    pub notes: Option<&'a str>,
    pub created_by: Option<&'a str>,
}

async fn fetch_room_in(conn: &mut SqliteConnection, room_id: &str) -> ApiResult<Room> {
    sqlx::query_as::<_, Room>("SELECT * FROM rooms WHERE id = ?")
        .bind(room_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::not_found("Room"))
}

async fn fetch_booking_in(conn: &mut SqliteConnection, booking_id: &str) -> ApiResult<Booking> {
    sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
        .bind(booking_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::not_found("Booking"))
}

fn check_capacity(room: &Room, adults: i64, children: i64) -> ApiResult<()> {
    if adults < 1 {
        return Err(ApiError::validation("At least one adult is required"));
    }
    if children < 0 {
        return Err(ApiError::validation("Children cannot be negative"));
    }
    if adults + children > room.capacity {
        return Err(ApiError::ValidationError(format!(
            "Room {} holds at most {} guest(s)", room.number, room.capacity
        )));
    }
    Ok(())
}

/// Nights times the room's daily rate.
pub fn default_total(room: &Room, check_in: DateTime<Utc>, check_out: DateTime<Utc>) -> f64 {
    round_cents(nights_between(check_in, check_out) as f64 * room.daily_rate)
}

/// Fails with 409 when another room-holding booking overlaps `[check_in, check_out)`.
pub async fn ensure_room_free(
    conn: &mut SqliteConnection,
    room_id: &str,
    check_in: DateTime<Utc>,
    check_out: DateTime<Utc>,
    exclude_booking_id: Option<&str>,
) -> ApiResult<()> {
    let sql = format!(
        r#"
        SELECT id FROM bookings
        WHERE room_id = ?
          AND id != ?
          AND status IN ({})
          AND check_in < ?
          AND check_out > ?
        LIMIT 1
        "#,
        ROOM_HOLDING_STATUSES
    );

    let overlapping: Option<(String,)> = sqlx::query_as(&sql)
        .bind(room_id)
        .bind(exclude_booking_id.unwrap_or(""))
        .bind(check_out)
        .bind(check_in)
        .fetch_optional(&mut *conn)
        .await?;

    if let Some((other,)) = overlapping {
        return Err(ApiError::Conflict(format!(
            "Room is already booked for these dates (booking {})", other
        )));
    }
    Ok(())
}

/// Inserts a booking after validating guest, room, capacity and overlap.
/// The overlap check runs after the insert, so callers must pass an open
/// transaction: an `Err` drops it and nothing is written.
pub async fn insert_booking(conn: &mut SqliteConnection, new: &NewBooking<'_>) -> ApiResult<Booking> {
    validate_date_range(new.check_in, new.check_out, "Stay")?;
    if !matches!(new.status, BookingStatus::PreBooking | BookingStatus::Confirmed) {
        return Err(ApiError::validation("New bookings start as PRE_BOOKING or CONFIRMED"));
    }

    let room = fetch_room_in(conn, new.room_id).await?;
    let guest: Option<(String,)> = sqlx::query_as("SELECT id FROM guests WHERE id = ?")
        .bind(new.guest_id)
        .fetch_optional(&mut *conn)
        .await?;
    if guest.is_none() {
        return Err(ApiError::not_found("Guest"));
    }

    check_capacity(&room, new.adults, new.children)?;

    let total_amount = match new.total_amount {
        Some(total) if !total.is_finite() || total < 0.0 => {
            return Err(ApiError::validation("Total amount cannot be negative"));
        }
        Some(total) => round_cents(total),
        None => default_total(&room, new.check_in, new.check_out),
    };

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO bookings (id, room_id, guest_id, check_in, check_out, adults, children, status,
                              total_amount, paid_amount, source, notes, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?)
        "#
    )
    .bind(&id)
    .bind(new.room_id)
    .bind(new.guest_id)
    .bind(new.check_in)
    .bind(new.check_out)
    .bind(new.adults)
    .bind(new.children)
    .bind(new.status.as_str())
    .bind(total_amount)
    .bind(new.source)
    .bind(new.notes)
    .bind(new.created_by)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    ensure_room_free(conn, new.room_id, new.check_in, new.check_out, Some(&id)).await?;

    fetch_booking_in(conn, &id).await
}

/// Moves `paid_amount` by `delta`, keeping it within `[0, total_amount]`.
pub async fn apply_booking_payment(conn: &mut SqliteConnection, booking_id: &str, delta: f64) -> ApiResult<Booking> {
    let booking = fetch_booking_in(conn, booking_id).await?;
    let new_paid = round_cents(booking.paid_amount + delta);

    if new_paid > booking.total_amount + 0.005 {
        return Err(ApiError::ValidationError(format!(
            "Payment exceeds the outstanding balance of {:.2}", booking.balance_due()
        )));
    }
    if new_paid < -0.005 {
        return Err(ApiError::conflict("Payment reversal exceeds the amount paid"));
    }

    let result = sqlx::query("UPDATE bookings SET paid_amount = ?, updated_at = ? WHERE id = ? AND paid_amount = ?")
        .bind(new_paid.max(0.0))
        .bind(Utc::now())
        .bind(booking_id)
        .bind(booking.paid_amount)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Booking was modified concurrently, try again"));
    }

    fetch_booking_in(conn, booking_id).await
}

pub async fn fetch_booking_details(pool: &SqlitePool, booking_id: &str) -> ApiResult<BookingDetails> {
    let sql = format!("{} WHERE b.id = ?", BOOKING_DETAILS_SELECT);
    sqlx::query_as::<_, BookingDetails>(&sql)
        .bind(booking_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Booking"))
}

/// Stay history of one guest, newest first.
pub async fn bookings_for_guest(pool: &SqlitePool, guest_id: &str) -> ApiResult<Vec<BookingDetails>> {
    let sql = format!("{} WHERE b.guest_id = ? ORDER BY b.check_in DESC", BOOKING_DETAILS_SELECT);
    let bookings = sqlx::query_as::<_, BookingDetails>(&sql)
        .bind(guest_id)
        .fetch_all(pool)
        .await?;
    Ok(bookings)
}

// ==================== LIST / READ ====================

pub async fn get_bookings(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<BookingQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Bookings)?;
    let (page, per_page, offset) = PaginationQuery::from_parts(query.page, query.per_page).normalize();

    let status = match query.status.as_deref() {
        Some(raw) => Some(
            BookingStatus::parse(raw)
                .ok_or_else(|| ApiError::ValidationError(format!("Invalid booking status: '{}'", raw)))?
                .as_str(),
        ),
        None => None,
    };

    // `from`/`to` select stays overlapping the window
    let filter = r#"
        WHERE (?1 IS NULL OR b.status = ?1)
          AND (?2 IS NULL OR b.room_id = ?2)
          AND (?3 IS NULL OR b.guest_id = ?3)
          AND (?4 IS NULL OR b.check_out > ?4)
          AND (?5 IS NULL OR b.check_in < ?5)
    "#;

    let count_sql = format!("SELECT COUNT(*) FROM bookings b {}", filter);
    let total: (i64,) = sqlx::query_as(&count_sql)
        .bind(status)
        .bind(&query.room_id)
        .bind(&query.guest_id)
        .bind(query.from)
        .bind(query.to)
        .fetch_one(&app_state.db_pool)
        .await?;

    let sql = format!("{} {} ORDER BY b.check_in DESC LIMIT ?6 OFFSET ?7", BOOKING_DETAILS_SELECT, filter);
    let bookings = sqlx::query_as::<_, BookingDetails>(&sql)
        .bind(status)
        .bind(&query.room_id)
        .bind(&query.guest_id)
        .bind(query.from)
        .bind(query.to)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse::new(bookings, total.0, page, per_page))))
}

pub async fn load_today(app_state: &AppState, now: DateTime<Utc>) -> ApiResult<TodayOverview> {
    let pool = &app_state.db_pool;
    let date = app_state.config.hotel.local_date(now);
    let (day_start, day_end) = app_state.config.hotel.day_bounds(date);

    let arrivals_sql = format!(
        "{} WHERE b.status IN ('PRE_BOOKING', 'CONFIRMED') AND b.check_in >= ? AND b.check_in < ? ORDER BY b.check_in",
        BOOKING_DETAILS_SELECT
    );
    let arrivals = sqlx::query_as::<_, BookingDetails>(&arrivals_sql)
        .bind(day_start)
        .bind(day_end)
        .fetch_all(pool)
        .await?;

    let departures_sql = format!(
        "{} WHERE b.status = 'CHECKED_IN' AND b.check_out < ? ORDER BY b.check_out",
        BOOKING_DETAILS_SELECT
    );
    let departures = sqlx::query_as::<_, BookingDetails>(&departures_sql)
        .bind(day_end)
        .fetch_all(pool)
        .await?;

    let in_house_sql = format!("{} WHERE b.status = 'CHECKED_IN' ORDER BY r.number", BOOKING_DETAILS_SELECT);
    let in_house = sqlx::query_as::<_, BookingDetails>(&in_house_sql)
        .fetch_all(pool)
        .await?;

    Ok(TodayOverview { date, arrivals, departures, in_house })
}

pub async fn get_today_bookings(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Bookings)?;
    let overview = load_today(&app_state, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(overview)))
}

pub async fn get_booking(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Bookings)?;
    let booking = fetch_booking_details(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(booking)))
}

// ==================== CREATE / UPDATE / DELETE ====================

pub async fn create_booking(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateBookingRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Bookings)?;
    body.validate()?;

    let status = match body.status.as_deref() {
        Some(raw) => BookingStatus::parse(raw)
            .ok_or_else(|| ApiError::ValidationError(format!("Invalid booking status: '{}'", raw)))?,
        None => BookingStatus::PreBooking,
    };
    let notes = clean_optional(&body.notes);

    let mut tx = app_state.db_pool.begin().await?;
    let booking = insert_booking(&mut tx, &NewBooking {
        room_id: &body.room_id,
        guest_id: &body.guest_id,
        check_in: body.check_in,
        check_out: body.check_out,
        adults: body.adults,
        children: body.children.unwrap_or(0),
        total_amount: body.total_amount,
        status,
        source: SOURCE_ADMIN,
        notes: notes.as_deref(),
        created_by: Some(&claims.sub),
    }).await?;
    tx.commit().await?;

    let details = fetch_booking_details(&app_state.db_pool, &booking.id).await?;
    audit(&app_state.db_pool, &claims, "create", "booking", &booking.id,
        &format!("Booking for {} in room {} ({} → {})", details.guest_name, details.room_number,
            booking.check_in.format("%d/%m/%Y"), booking.check_out.format("%d/%m/%Y")), &http_request).await;
    info!("📅 Created booking {} (room {}, {} nights)", booking.id, details.room_number, booking.nights());
    Ok(HttpResponse::Created().json(ApiResponse::success(details)))
}

pub async fn update_booking(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdateBookingRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Bookings)?;
    body.validate()?;
    let booking_id = path.into_inner();

    let mut tx = app_state.db_pool.begin().await?;
    let existing = fetch_booking_in(&mut tx, &booking_id).await?;
    let status = existing.booking_status().unwrap_or(BookingStatus::PreBooking);
    if status.is_terminal() {
        return Err(ApiError::Conflict(format!("A {} booking can no longer be changed", status)));
    }

    let room_id = body.room_id.clone().unwrap_or_else(|| existing.room_id.clone());
    let check_in = body.check_in.unwrap_or(existing.check_in);
    let check_out = body.check_out.unwrap_or(existing.check_out);
    let adults = body.adults.unwrap_or(existing.adults);
    let children = body.children.unwrap_or(existing.children);
    validate_date_range(check_in, check_out, "Stay")?;

    if status == BookingStatus::CheckedIn && room_id != existing.room_id {
        return Err(ApiError::conflict("A checked-in stay cannot move to another room"));
    }

    let room = fetch_room_in(&mut tx, &room_id).await?;
    check_capacity(&room, adults, children)?;

    let stay_changed = room_id != existing.room_id || check_in != existing.check_in || check_out != existing.check_out;
    let total_amount = match body.total_amount {
        Some(total) => round_cents(total),
        None if stay_changed => default_total(&room, check_in, check_out),
        None => existing.total_amount,
    };
    if total_amount + 0.005 < existing.paid_amount {
        return Err(ApiError::ValidationError(format!(
            "Total cannot be below the {:.2} already paid", existing.paid_amount
        )));
    }
    let notes = clean_optional(&body.notes).or_else(|| existing.notes.clone());

    if stay_changed {
        ensure_room_free(&mut tx, &room_id, check_in, check_out, Some(&booking_id)).await?;
    }

    sqlx::query(
        r#"
        UPDATE bookings
        SET room_id = ?, check_in = ?, check_out = ?, adults = ?, children = ?, total_amount = ?, notes = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(&room_id)
    .bind(check_in)
    .bind(check_out)
    .bind(adults)
    .bind(children)
    .bind(total_amount)
    .bind(&notes)
    .bind(Utc::now())
    .bind(&booking_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let mut cs = ChangeSet::new();
    cs.add("room_id", &existing.room_id, &room_id);
    cs.add("check_in", &existing.check_in, &check_in);
    cs.add("check_out", &existing.check_out, &check_out);
    cs.add("adults", &existing.adults, &adults);
    cs.add("children", &existing.children, &children);
    cs.add("total_amount", &existing.total_amount, &total_amount);

    let details = fetch_booking_details(&app_state.db_pool, &booking_id).await?;
    audit_with_changes(&app_state.db_pool, &claims, "edit", "booking", &booking_id,
        &format!("Booking updated: {}", cs.to_description()), &cs, &http_request).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(details)))
}

/// Only bookings that never held a guest nor received money can be deleted.
pub async fn delete_booking(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Bookings)?;
    let booking_id = path.into_inner();
    let details = fetch_booking_details(&app_state.db_pool, &booking_id).await?;
    let booking = &details.booking;

    if matches!(booking.booking_status(), Some(BookingStatus::CheckedIn | BookingStatus::CheckedOut)) {
        return Err(ApiError::conflict("Stays that were checked in are kept for the record"));
    }
    if booking.paid_amount > 0.0 {
        return Err(ApiError::conflict("Booking has payments; cancel it instead"));
    }

    sqlx::query("DELETE FROM bookings WHERE id = ?")
        .bind(&booking_id)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "delete", "booking", &booking_id,
        &format!("Deleted booking of {} in room {}", details.guest_name, details.room_number), &http_request).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Booking deleted".to_string())))
}

// ==================== STATUS TRANSITIONS ====================

async fn transition(
    app_state: &AppState,
    booking_id: &str,
    target: BookingStatus,
    http_request: &HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(http_request, Scope::Bookings)?;
    let now = Utc::now();

    let mut tx = app_state.db_pool.begin().await?;
    let booking = fetch_booking_in(&mut tx, booking_id).await?;
    let current = booking.booking_status().unwrap_or(BookingStatus::PreBooking);

    if !current.can_transition_to(target) {
        return Err(ApiError::invalid_transition("Booking", current.as_str(), target.as_str()));
    }

    let stamp_column = match target {
        BookingStatus::CheckedIn => Some("checked_in_at"),
        BookingStatus::CheckedOut => Some("checked_out_at"),
        BookingStatus::Cancelled => Some("cancelled_at"),
        _ => None,
    };
    let sql = match stamp_column {
        Some(column) => format!("UPDATE bookings SET status = ?1, {} = ?2, updated_at = ?2 WHERE id = ?3 AND status = ?4", column),
        None => "UPDATE bookings SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4".to_string(),
    };

    let result = sqlx::query(&sql)
        .bind(target.as_str())
        .bind(now)
        .bind(booking_id)
        .bind(current.as_str())
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Booking was modified concurrently, try again"));
    }

    match target {
        BookingStatus::CheckedIn => set_room_status(&mut *tx, &booking.room_id, RoomStatus::Occupied, Some(&claims.sub)).await?,
        BookingStatus::CheckedOut => set_room_status(&mut *tx, &booking.room_id, RoomStatus::Cleaning, Some(&claims.sub)).await?,
        _ => {}
    }
    tx.commit().await?;

    let details = fetch_booking_details(&app_state.db_pool, booking_id).await?;
    audit(&app_state.db_pool, &claims, "status", "booking", booking_id,
        &format!("Booking of {} in room {}: {} → {}", details.guest_name, details.room_number, current, target),
        http_request).await;
    info!("📅 Booking {} {} → {}", booking_id, current, target);
    Ok(HttpResponse::Ok().json(ApiResponse::success(details)))
}

pub async fn confirm_booking(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    transition(&app_state, &path.into_inner(), BookingStatus::Confirmed, &http_request).await
}

pub async fn check_in_booking(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    transition(&app_state, &path.into_inner(), BookingStatus::CheckedIn, &http_request).await
}

pub async fn check_out_booking(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    transition(&app_state, &path.into_inner(), BookingStatus::CheckedOut, &http_request).await
}

pub async fn cancel_booking(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    transition(&app_state, &path.into_inner(), BookingStatus::Cancelled, &http_request).await
}

pub async fn no_show_booking(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    transition(&app_state, &path.into_inner(), BookingStatus::NoShow, &http_request).await
}

// ==================== PAYMENTS ====================

/// Raises `paid_amount` and books the matching revenue and ledger entry in one transaction.
pub async fn register_payment(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<RegisterPaymentRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Bookings)?;
    body.validate()?;
    let booking_id = path.into_inner();
    let details = fetch_booking_details(&app_state.db_pool, &booking_id).await?;

    let paid_on = body.paid_on.unwrap_or_else(|| app_state.config.hotel.local_date(Utc::now()));
    let description = format!("Hospedagem quarto {} - {}", details.room_number, details.guest_name);
    let payment_method = clean_optional(&body.payment_method);
    let notes = clean_optional(&body.notes);

    let mut tx = app_state.db_pool.begin().await?;
    let booking = apply_booking_payment(&mut tx, &booking_id, body.amount).await?;
    let revenue_id = record_revenue(&mut tx, &RevenueEntry {
        source: RevenueSource::Booking,
        description: &description,
        amount: body.amount,
        revenue_date: paid_on,
        payment_method: payment_method.as_deref(),
        booking_id: Some(&booking_id),
        notes: notes.as_deref(),
        created_by: Some(&claims.sub),
    }).await?;
    tx.commit().await?;

    audit(&app_state.db_pool, &claims, "payment", "booking", &booking_id,
        &format!("Payment of {:.2} registered ({}), balance {:.2}", body.amount, revenue_id, booking.balance_due()),
        &http_request).await;
    info!("💰 Payment of {:.2} on booking {}", body.amount, booking_id);

    let details = fetch_booking_details(&app_state.db_pool, &booking_id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(serde_json::json!({
        "booking": details,
        "revenue_id": revenue_id,
        "balance_due": booking.balance_due(),
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;
    use chrono::Duration;

    fn booking_body(room_id: &str, guest_id: &str, check_in: DateTime<Utc>, nights: i64) -> CreateBookingRequest {
        CreateBookingRequest {
            room_id: room_id.to_string(),
            guest_id: guest_id.to_string(),
            check_in,
            check_out: check_in + Duration::days(nights),
            adults: 2,
            children: None,
            total_amount: None,
            status: None,
            notes: None,
        }
    }

    #[actix_rt::test]
    async fn test_create_booking_defaults_total_from_rate() {
        let state = test_state().await;
        let room = seed_room(&state, "101", 2, 250.0).await;
        let guest = seed_guest(&state, "Carla Souza", None).await;
        let start = now_secs() + Duration::days(10);

        let resp = create_booking(state.clone(), web::Json(booking_body(&room, &guest, start, 3)), owner_request())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = response_json(resp).await;
        assert_eq!(body["data"]["status"], "PRE_BOOKING");
        assert_eq!(body["data"]["total_amount"], 750.0);
        assert_eq!(body["data"]["room_number"], "101");
    }

    #[actix_rt::test]
    async fn test_overlapping_booking_is_rejected_and_rolled_back() {
        let state = test_state().await;
        let room = seed_room(&state, "102", 2, 200.0).await;
        let guest = seed_guest(&state, "Pedro Lima", None).await;
        let start = now_secs() + Duration::days(5);

        create_booking(state.clone(), web::Json(booking_body(&room, &guest, start, 4)), owner_request()).await.unwrap();
        let err = create_booking(state.clone(), web::Json(booking_body(&room, &guest, start + Duration::days(2), 2)), owner_request())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bookings").fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(count.0, 1);

        // Checking out on the day the next guest arrives is fine
        assert!(create_booking(state.clone(), web::Json(booking_body(&room, &guest, start + Duration::days(4), 1)), owner_request())
            .await
            .is_ok());
    }

    #[actix_rt::test]
    async fn test_capacity_and_missing_guest() {
        let state = test_state().await;
        let room = seed_room(&state, "103", 2, 200.0).await;
        let guest = seed_guest(&state, "Lúcia Alves", None).await;
        let start = now_secs() + Duration::days(1);

        let mut body = booking_body(&room, &guest, start, 1);
        body.children = Some(1);
        let err = create_booking(state.clone(), web::Json(body), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let err = create_booking(state.clone(), web::Json(booking_body(&room, "nobody", start, 1)), owner_request())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let mut body = booking_body(&room, &guest, start, 1);
        body.check_out = start;
        let err = create_booking(state.clone(), web::Json(body), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_rt::test]
    async fn test_check_in_and_out_drive_room_status() {
        let state = test_state().await;
        let room = seed_room(&state, "104", 2, 200.0).await;
        let guest = seed_guest(&state, "Rafael Dias", None).await;
        let now = now_secs();
        let id = seed_booking(&state, &room, &guest, now - Duration::hours(2), now + Duration::days(2), "PRE_BOOKING").await;

        let err = check_in_booking(state.clone(), web::Path::from(id.clone()), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        confirm_booking(state.clone(), web::Path::from(id.clone()), owner_request()).await.unwrap();
        let resp = check_in_booking(state.clone(), web::Path::from(id.clone()), owner_request()).await.unwrap();
        let body = response_json(resp).await;
        assert_eq!(body["data"]["status"], "CHECKED_IN");
        assert!(body["data"]["checked_in_at"].is_string());

        let stored: (String,) = sqlx::query_as("SELECT status FROM rooms WHERE id = ?").bind(&room).fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(stored.0, "OCCUPIED");

        check_out_booking(state.clone(), web::Path::from(id.clone()), owner_request()).await.unwrap();
        let stored: (String,) = sqlx::query_as("SELECT status FROM rooms WHERE id = ?").bind(&room).fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(stored.0, "CLEANING");

        let err = cancel_booking(state.clone(), web::Path::from(id), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[actix_rt::test]
    async fn test_payment_records_revenue_and_transaction() {
        let state = test_state().await;
        let room = seed_room(&state, "105", 2, 200.0).await;
        let guest = seed_guest(&state, "Beatriz Rocha", None).await;
        let now = now_secs();
        let id = seed_booking(&state, &room, &guest, now, now + Duration::days(2), "CONFIRMED").await;

        let payment = RegisterPaymentRequest { amount: 300.0, payment_method: Some("PIX".to_string()), paid_on: None, notes: None };
        let resp = register_payment(state.clone(), web::Path::from(id.clone()), web::Json(payment), owner_request()).await.unwrap();
        let body = response_json(resp).await;
        assert_eq!(body["data"]["balance_due"], 200.0);

        let revenue: (String, f64) = sqlx::query_as("SELECT source, amount FROM revenues WHERE booking_id = ?")
            .bind(&id)
            .fetch_one(&state.db_pool)
            .await
            .unwrap();
        assert_eq!(revenue, ("BOOKING".to_string(), 300.0));
        let income: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions WHERE kind = 'INCOME'")
            .fetch_one(&state.db_pool)
            .await
            .unwrap();
        assert_eq!(income.0, 1);

        // Over the remaining balance: nothing is written
        let payment = RegisterPaymentRequest { amount: 250.0, payment_method: None, paid_on: None, notes: None };
        let err = register_payment(state.clone(), web::Path::from(id.clone()), web::Json(payment), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let revenues: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM revenues").fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(revenues.0, 1);
    }

    #[actix_rt::test]
    async fn test_update_rejects_terminal_and_overlapping_changes() {
        let state = test_state().await;
        let room = seed_room(&state, "106", 4, 200.0).await;
        let guest = seed_guest(&state, "Tiago Nunes", None).await;
        let now = now_secs();
        let first = seed_booking(&state, &room, &guest, now + Duration::days(1), now + Duration::days(3), "CONFIRMED").await;
        seed_booking(&state, &room, &guest, now + Duration::days(5), now + Duration::days(7), "PRE_BOOKING").await;
        let done = seed_booking(&state, &room, &guest, now - Duration::days(9), now - Duration::days(7), "CHECKED_OUT").await;

        let update = UpdateBookingRequest { check_out: Some(now + Duration::days(6)), ..Default::default() };
        let err = update_booking(state.clone(), web::Path::from(first.clone()), web::Json(update), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        // Moving within its own window does not collide with itself
        let update = UpdateBookingRequest { check_in: Some(now + Duration::days(2)), ..Default::default() };
        let resp = update_booking(state.clone(), web::Path::from(first), web::Json(update), owner_request()).await.unwrap();
        assert_eq!(response_json(resp).await["data"]["total_amount"], 200.0);

        let update = UpdateBookingRequest { adults: Some(1), ..Default::default() };
        let err = update_booking(state.clone(), web::Path::from(done), web::Json(update), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[actix_rt::test]
    async fn test_today_overview() {
        let state = test_state().await;
        let room_a = seed_room(&state, "201", 2, 200.0).await;
        let room_b = seed_room(&state, "202", 2, 200.0).await;
        let guest = seed_guest(&state, "Helena Prado", None).await;
        let now = now_secs();
        let (day_start, _) = state.config.hotel.day_bounds(state.config.hotel.local_date(now));

        seed_booking(&state, &room_a, &guest, day_start + Duration::hours(15), day_start + Duration::days(2), "CONFIRMED").await;
        seed_booking(&state, &room_b, &guest, day_start - Duration::days(2), day_start + Duration::hours(11), "CHECKED_IN").await;

        let today = load_today(&state, now).await.unwrap();
        assert_eq!(today.arrivals.len(), 1);
        assert_eq!(today.departures.len(), 1);
        assert_eq!(today.in_house.len(), 1);
        assert_eq!(today.in_house[0].room_number, "202");
    }

    #[actix_rt::test]
    async fn test_bookings_list_filters_by_status() {
        let state = test_state().await;
        let room = seed_room(&state, "301", 2, 200.0).await;
        let guest = seed_guest(&state, "Otávio Reis", None).await;
        let now = now_secs();
        seed_booking(&state, &room, &guest, now + Duration::days(1), now + Duration::days(2), "CONFIRMED").await;
        seed_booking(&state, &room, &guest, now + Duration::days(3), now + Duration::days(4), "CANCELLED").await;

        let query = BookingQuery { status: Some("confirmed".to_string()), ..Default::default() };
        let body = response_json(get_bookings(state.clone(), web::Query(query), owner_request()).await.unwrap()).await;
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["data"][0]["status"], "CONFIRMED");

        let query = BookingQuery { room_id: Some(room), ..Default::default() };
        let body = response_json(get_bookings(state.clone(), web::Query(query), owner_request()).await.unwrap()).await;
        assert_eq!(body["data"]["total"], 2);
    }
}
