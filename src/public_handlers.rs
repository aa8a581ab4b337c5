// src/public_handlers.rs
//! Unauthenticated endpoints behind the property's website

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use validator::Validate;
use log::info;

use crate::AppState;
use crate::booking_handlers::{insert_booking, NewBooking};
use crate::error::{ApiError, ApiResult};
use crate::guest_handlers::{find_or_create_guest, GuestContact};
use crate::handlers::ApiResponse;
use crate::models::*;
use crate::quote_handlers::insert_quote;
use crate::room_handlers::find_available_rooms;
use crate::validation::{clean_optional, validate_date_range};

/// Rooms currently offered for sale, without internal fields.
pub async fn get_public_rooms(
    app_state: web::Data<Arc<AppState>>,
) -> ApiResult<HttpResponse> {
    let rooms = sqlx::query_as::<_, PublicRoom>(
        r#"
        SELECT id, name, category, capacity, daily_rate, description, amenities
        FROM rooms
        WHERE status NOT IN ('MAINTENANCE', 'BLOCKED')
        ORDER BY daily_rate ASC, number ASC
        "#
    )
    .fetch_all(&app_state.db_pool)
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(rooms)))
}

pub async fn get_public_availability(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<AvailabilityQuery>,
) -> ApiResult<HttpResponse> {
    validate_date_range(query.check_in, query.check_out, "Stay")?;

    let rooms: Vec<PublicRoom> = find_available_rooms(
        &app_state.db_pool,
        query.check_in,
        query.check_out,
        query.guests.unwrap_or(1).max(1),
    )
    .await?
    .into_iter()
    .map(PublicRoom::from)
    .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(rooms)))
}

/// Website stays start today or later, in the hotel's local calendar.
fn ensure_not_in_past(app_state: &AppState, check_in: DateTime<Utc>) -> ApiResult<()> {
    let hotel = &app_state.config.hotel;
    let (today_start, _) = hotel.day_bounds(hotel.local_date(Utc::now()));
    if check_in < today_start {
        return Err(ApiError::validation("Check-in date cannot be in the past"));
    }
    Ok(())
}

pub async fn create_public_quote(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateQuoteRequest>,
) -> ApiResult<HttpResponse> {
    ensure_not_in_past(&app_state, body.check_in)?;
    let quote = insert_quote(&app_state.db_pool, &body, SOURCE_WEBSITE).await?;
    info!("🌐 Website quote request from '{}' ({})", quote.guest_name, quote.id);

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        serde_json::json!({ "id": quote.id, "status": quote.status }),
        "Quote request received".to_string(),
    )))
}

/// Places a PRE_BOOKING for a website visitor. Guest matching and the
/// booking insert share one transaction.
pub async fn create_public_reservation(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<PublicReservationRequest>,
) -> ApiResult<HttpResponse> {
    body.validate()?;
    validate_date_range(body.check_in, body.check_out, "Stay")?;
    ensure_not_in_past(&app_state, body.check_in)?;

    let mut tx = app_state.db_pool.begin().await?;

    let room_status: Option<(String,)> = sqlx::query_as("SELECT status FROM rooms WHERE id = ?")
        .bind(&body.room_id)
        .fetch_optional(&mut *tx)
        .await?;
    let (room_status,) = room_status.ok_or_else(|| ApiError::not_found("Room"))?;
    if RoomStatus::parse(&room_status).map_or(false, RoomStatus::is_out_of_service) {
        return Err(ApiError::conflict("Room is not available for booking"));
    }

    let phone = clean_optional(&body.phone);
    let guest_id = find_or_create_guest(&mut tx, &GuestContact {
        name: &body.name,
        email: Some(&body.email),
        phone: phone.as_deref(),
        document: body.document.as_deref(),
    }, None).await?;

    let notes = clean_optional(&body.notes);
    let booking = insert_booking(&mut tx, &NewBooking {
        room_id: &body.room_id,
        guest_id: &guest_id,
        check_in: body.check_in,
        check_out: body.check_out,
        adults: body.adults,
        children: body.children.unwrap_or(0),
        total_amount: None,
        status: BookingStatus::PreBooking,
        source: SOURCE_WEBSITE,
        notes: notes.as_deref(),
        created_by: None,
    }).await?;
    tx.commit().await?;

    info!("🌐 Website reservation {} for '{}' ({} nights)", booking.id, body.name.trim(), booking.nights());

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        serde_json::json!({
            "id": booking.id,
            "status": booking.status,
            "check_in": booking.check_in,
            "check_out": booking.check_out,
            "nights": booking.nights(),
            "total_amount": booking.total_amount,
        }),
        "Reservation received, we will confirm it shortly".to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room_handlers::set_room_status;
    use crate::test_utils::*;
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;
    use chrono::Duration;

    fn reservation(room_id: &str, check_in: DateTime<Utc>, nights: i64) -> PublicReservationRequest {
        PublicReservationRequest {
            room_id: room_id.to_string(),
            name: "Fernanda Lima".to_string(),
            email: "Fernanda@Exemplo.com".to_string(),
            phone: Some("(31) 99876-5432".to_string()),
            document: None,
            check_in,
            check_out: check_in + Duration::days(nights),
            adults: 2,
            children: None,
            notes: None,
        }
    }

    #[actix_rt::test]
    async fn test_public_rooms_hide_out_of_service() {
        let state = test_state().await;
        seed_room(&state, "101", 2, 250.0).await;
        let blocked = seed_room(&state, "102", 2, 300.0).await;
        set_room_status(&state.db_pool, &blocked, RoomStatus::Blocked, None).await.unwrap();

        let body = response_json(get_public_rooms(state.clone()).await.unwrap()).await;
        let rooms = body["data"].as_array().unwrap();
        assert_eq!(rooms.len(), 1);
        assert!(rooms[0].get("status").is_none());
        assert!(rooms[0].get("number").is_none());
    }

    #[actix_rt::test]
    async fn test_reservation_reuses_guest_and_rejects_overlap() {
        let state = test_state().await;
        let room = seed_room(&state, "201", 3, 200.0).await;
        let check_in = now_secs() + Duration::days(10);

        let resp = create_public_reservation(state.clone(), web::Json(reservation(&room, check_in, 3))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = response_json(resp).await;
        assert_eq!(body["data"]["status"], "PRE_BOOKING");
        assert_eq!(body["data"]["total_amount"], 600.0);

        let err = create_public_reservation(state.clone(), web::Json(reservation(&room, check_in + Duration::days(1), 2)))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        create_public_reservation(state.clone(), web::Json(reservation(&room, check_in + Duration::days(3), 2))).await.unwrap();

        let guests: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM guests").fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(guests.0, 1);
        let sources: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bookings WHERE source = 'WEBSITE'")
            .fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(sources.0, 2);
    }

    #[actix_rt::test]
    async fn test_reservation_on_blocked_room_rejected() {
        let state = test_state().await;
        let room = seed_room(&state, "301", 2, 180.0).await;
        set_room_status(&state.db_pool, &room, RoomStatus::Maintenance, None).await.unwrap();

        let err = create_public_reservation(state.clone(), web::Json(reservation(&room, now_secs() + Duration::days(2), 2)))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let guests: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM guests").fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(guests.0, 0);
    }

    #[actix_rt::test]
    async fn test_public_quote_marked_as_website() {
        let state = test_state().await;
        let check_in = now_secs() + Duration::days(30);
        let body = CreateQuoteRequest {
            guest_name: "Paulo Mendes".to_string(),
            email: Some("paulo@exemplo.com".to_string()),
            phone: None,
            check_in,
            check_out: check_in + Duration::days(2),
            adults: 2,
            children: Some(1),
            room_id: None,
            room_category: Some("luxo".to_string()),
            total_amount: None,
            notes: None,
        };
        let resp = create_public_quote(state.clone(), web::Json(body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let (source, category): (String, String) = sqlx::query_as("SELECT source, room_category FROM quotes")
            .fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(source, "WEBSITE");
        assert_eq!(category, "LUXO");
    }

    fn quote_request(room_id: Option<String>, check_in: DateTime<Utc>, nights: i64) -> CreateQuoteRequest {
        CreateQuoteRequest {
            guest_name: "Renata Dias".to_string(),
            email: Some("renata@exemplo.com".to_string()),
            phone: None,
            check_in,
            check_out: check_in + Duration::days(nights),
            adults: 2,
            children: None,
            room_id,
            room_category: None,
            total_amount: None,
            notes: None,
        }
    }

    #[actix_rt::test]
    async fn test_public_quote_ignores_client_total() {
        let state = test_state().await;
        let room = seed_room(&state, "401", 2, 500.0).await;
        let mut body = quote_request(Some(room), now_secs() + Duration::days(20), 3);
        body.total_amount = Some(0.01);

        let resp = create_public_quote(state.clone(), web::Json(body)).await.unwrap();
        let quote_id = response_json(resp).await["data"]["id"].as_str().unwrap().to_string();
        let (total,): (Option<f64>,) = sqlx::query_as("SELECT total_amount FROM quotes WHERE id = ?")
            .bind(&quote_id)
            .fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(total, Some(1500.0));

        let resp = crate::quote_handlers::convert_quote(state.clone(), web::Path::from(quote_id), None, owner_request())
            .await
            .unwrap();
        assert_eq!(response_json(resp).await["data"]["total_amount"], 1500.0);
    }

    #[actix_rt::test]
    async fn test_public_requests_reject_past_check_in() {
        let state = test_state().await;
        let room = seed_room(&state, "402", 2, 300.0).await;
        let long_ago = now_secs() - Duration::days(400);

        let err = create_public_reservation(state.clone(), web::Json(reservation(&room, long_ago, 2)))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let err = create_public_quote(state.clone(), web::Json(quote_request(Some(room.clone()), long_ago, 2)))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let bookings: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bookings").fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(bookings.0, 0);
        let quotes: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM quotes").fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(quotes.0, 0);
    }

    #[actix_rt::test]
    async fn test_public_availability_validates_range() {
        let state = test_state().await;
        seed_room(&state, "101", 2, 250.0).await;
        let check_in = now_secs() + Duration::days(1);
        let query = AvailabilityQuery { check_in, check_out: check_in, guests: None };
        let err = get_public_availability(state.clone(), web::Query(query)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let query = AvailabilityQuery { check_in, check_out: check_in + Duration::days(1), guests: Some(2) };
        let body = response_json(get_public_availability(state.clone(), web::Query(query)).await.unwrap()).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }
}
