// src/quote_handlers.rs
//! Price quotes and their conversion into bookings

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;
use log::info;

use crate::AppState;
use crate::audit::{audit, audit_with_changes, ChangeSet};
use crate::auth::{require_scope, Scope};
use crate::booking_handlers::{default_total, fetch_booking_details, insert_booking, NewBooking};
use crate::error::{ApiError, ApiResult};
use crate::guest_handlers::{find_or_create_guest, GuestContact};
use crate::handlers::ApiResponse;
use crate::models::*;
use crate::validation::{clean_optional, normalize_email, validate_date_range};

async fn fetch_quote(pool: &SqlitePool, quote_id: &str) -> ApiResult<Quote> {
    sqlx::query_as::<_, Quote>("SELECT * FROM quotes WHERE id = ?")
        .bind(quote_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Quote"))
}

fn quote_status(quote: &Quote) -> QuoteStatus {
    QuoteStatus::parse(&quote.status).unwrap_or(QuoteStatus::Pending)
}

/// Stores a new PENDING quote. Without an explicit total, a room gives an
/// estimate of nights times its daily rate. Website requests never carry
/// their own price.
pub async fn insert_quote(
    pool: &SqlitePool,
    request: &CreateQuoteRequest,
    source: &str,
) -> ApiResult<Quote> {
    request.validate()?;
    validate_date_range(request.check_in, request.check_out, "Stay")?;

    let room = match request.room_id.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(room_id) => Some(
            sqlx::query_as::<_, Room>("SELECT * FROM rooms WHERE id = ?")
                .bind(room_id)
                .fetch_optional(pool)
                .await?
                .ok_or_else(|| ApiError::not_found("Room"))?,
        ),
        None => None,
    };

    let requested_total = if source == SOURCE_WEBSITE { None } else { request.total_amount };
    let total_amount = match (requested_total, room.as_ref()) {
        (Some(total), _) => Some(round_cents(total)),
        (None, Some(room)) => Some(default_total(room, request.check_in, request.check_out)),
        (None, None) => None,
    };
    let room_category = clean_optional(&request.room_category)
        .map(|c| c.to_uppercase())
        .or_else(|| room.as_ref().map(|r| r.category.clone()));

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO quotes (id, guest_name, email, phone, check_in, check_out, adults, children, room_id,
                            room_category, total_amount, status, source, notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'PENDING', ?, ?, ?, ?)
        "#
    )
    .bind(&id)
    .bind(request.guest_name.trim())
    .bind(request.email.as_deref().and_then(normalize_email))
    .bind(clean_optional(&request.phone))
    .bind(request.check_in)
    .bind(request.check_out)
    .bind(request.adults)
    .bind(request.children.unwrap_or(0))
    .bind(room.as_ref().map(|r| r.id.clone()))
    .bind(&room_category)
    .bind(total_amount)
    .bind(source)
    .bind(clean_optional(&request.notes))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    fetch_quote(pool, &id).await
}

pub async fn get_quotes(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<QuoteQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Bookings)?;

    let status = match query.status.as_deref() {
        Some(raw) => Some(
            QuoteStatus::parse(raw)
                .ok_or_else(|| ApiError::ValidationError(format!("Invalid quote status: '{}'", raw)))?
                .as_str(),
        ),
        None => None,
    };

    let quotes = sqlx::query_as::<_, Quote>(
        "SELECT * FROM quotes WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at DESC"
    )
    .bind(status)
    .fetch_all(&app_state.db_pool)
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(quotes)))
}

pub async fn get_quote(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Bookings)?;
    let quote = fetch_quote(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(quote)))
}

pub async fn create_quote(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateQuoteRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Bookings)?;
    let quote = insert_quote(&app_state.db_pool, &body, SOURCE_ADMIN).await?;

    audit(&app_state.db_pool, &claims, "create", "quote", &quote.id,
        &format!("Quote for '{}' ({} → {})", quote.guest_name,
            quote.check_in.format("%d/%m/%Y"), quote.check_out.format("%d/%m/%Y")), &http_request).await;
    Ok(HttpResponse::Created().json(ApiResponse::success(quote)))
}

/// ACCEPTED is reserved for conversion; accepted quotes are frozen.
pub async fn update_quote(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdateQuoteRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Bookings)?;
    body.validate()?;
    let quote_id = path.into_inner();
    let existing = fetch_quote(&app_state.db_pool, &quote_id).await?;
    let current = quote_status(&existing);

    if current == QuoteStatus::Accepted {
        return Err(ApiError::conflict("Quote was already converted into a booking"));
    }

    let status = match body.status.as_deref() {
        Some(raw) => {
            let next = QuoteStatus::parse(raw)
                .ok_or_else(|| ApiError::ValidationError(format!("Invalid quote status: '{}'", raw)))?;
            if next == QuoteStatus::Accepted {
                return Err(ApiError::bad_request("Convert the quote to accept it"));
            }
            next
        }
        None => current,
    };

    let check_in = body.check_in.unwrap_or(existing.check_in);
    let check_out = body.check_out.unwrap_or(existing.check_out);
    validate_date_range(check_in, check_out, "Stay")?;

    let room_id = match body.room_id.as_deref().map(str::trim) {
        Some("") => None,
        Some(room_id) => {
            let found: Option<(String,)> = sqlx::query_as("SELECT id FROM rooms WHERE id = ?")
                .bind(room_id)
                .fetch_optional(&app_state.db_pool)
                .await?;
            Some(found.ok_or_else(|| ApiError::not_found("Room"))?.0)
        }
        None => existing.room_id.clone(),
    };
    let total_amount = body.total_amount.map(round_cents).or(existing.total_amount);
    let notes = clean_optional(&body.notes).or_else(|| existing.notes.clone());

    sqlx::query(
        r#"
        UPDATE quotes
        SET status = ?, room_id = ?, total_amount = ?, check_in = ?, check_out = ?, notes = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(status.as_str())
    .bind(&room_id)
    .bind(total_amount)
    .bind(check_in)
    .bind(check_out)
    .bind(&notes)
    .bind(Utc::now())
    .bind(&quote_id)
    .execute(&app_state.db_pool)
    .await?;

    let mut cs = ChangeSet::new();
    cs.add("status", &existing.status, &status.as_str().to_string());
    cs.add_opt("room_id", &existing.room_id, &room_id);
    cs.add_opt("total_amount", &existing.total_amount, &total_amount);
    cs.add("check_in", &existing.check_in, &check_in);
    cs.add("check_out", &existing.check_out, &check_out);
    if !cs.is_empty() {
        audit_with_changes(&app_state.db_pool, &claims, "edit", "quote", &quote_id,
            &format!("Quote for '{}' updated: {}", existing.guest_name, cs.to_description()), &cs, &http_request).await;
    }

    let quote = fetch_quote(&app_state.db_pool, &quote_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(quote)))
}

pub async fn delete_quote(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Bookings)?;
    let quote_id = path.into_inner();
    let quote = fetch_quote(&app_state.db_pool, &quote_id).await?;

    sqlx::query("DELETE FROM quotes WHERE id = ?")
        .bind(&quote_id)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "delete", "quote", &quote_id,
        &format!("Deleted quote for '{}'", quote.guest_name), &http_request).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Quote deleted".to_string())))
}

/// Turns an open quote into a PRE_BOOKING booking. Guest lookup, booking
/// insert and quote acceptance share one transaction.
pub async fn convert_quote(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: Option<web::Json<ConvertQuoteRequest>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Bookings)?;
    let body = body.map(|b| b.into_inner()).unwrap_or_default();
    body.validate()?;
    let quote_id = path.into_inner();
    let quote = fetch_quote(&app_state.db_pool, &quote_id).await?;

    let status = quote_status(&quote);
    if !status.is_open() {
        return Err(ApiError::invalid_transition("Quote", status.as_str(), QuoteStatus::Accepted.as_str()));
    }

    let room_id = body
        .room_id
        .clone()
        .or_else(|| quote.room_id.clone())
        .ok_or_else(|| ApiError::validation("Choose a room before converting the quote"))?;

    let mut tx = app_state.db_pool.begin().await?;
    let guest_id = find_or_create_guest(&mut tx, &GuestContact {
        name: &quote.guest_name,
        email: quote.email.as_deref(),
        phone: quote.phone.as_deref(),
        document: body.document.as_deref(),
    }, Some(&claims.sub)).await?;

    let booking = insert_booking(&mut tx, &NewBooking {
        room_id: &room_id,
        guest_id: &guest_id,
        check_in: quote.check_in,
        check_out: quote.check_out,
        adults: quote.adults,
        children: quote.children,
        total_amount: body.total_amount.or(quote.total_amount),
        status: BookingStatus::PreBooking,
        source: SOURCE_QUOTE,
        notes: quote.notes.as_deref(),
        created_by: Some(&claims.sub),
    }).await?;

    let result = sqlx::query("UPDATE quotes SET status = 'ACCEPTED', booking_id = ?, room_id = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(&booking.id)
        .bind(&room_id)
        .bind(Utc::now())
        .bind(&quote_id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Quote was modified concurrently, try again"));
    }
    tx.commit().await?;

    audit(&app_state.db_pool, &claims, "convert", "quote", &quote_id,
        &format!("Quote for '{}' converted into booking {}", quote.guest_name, booking.id), &http_request).await;
    info!("📅 Quote {} converted into booking {}", quote_id, booking.id);

    let details = fetch_booking_details(&app_state.db_pool, &booking.id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(details)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;
    use chrono::{DateTime, Duration};

    fn quote_body(room_id: Option<&str>, check_in: DateTime<Utc>, nights: i64) -> CreateQuoteRequest {
        CreateQuoteRequest {
            guest_name: "Renata Gomes".to_string(),
            email: Some("renata@exemplo.com".to_string()),
            phone: None,
            check_in,
            check_out: check_in + Duration::days(nights),
            adults: 2,
            children: None,
            room_id: room_id.map(str::to_string),
            room_category: None,
            total_amount: None,
            notes: None,
        }
    }

    #[actix_rt::test]
    async fn test_quote_estimates_total_from_room() {
        let state = test_state().await;
        let room = seed_room(&state, "101", 2, 180.0).await;
        let quote = insert_quote(&state.db_pool, &quote_body(Some(&room), now_secs() + Duration::days(3), 2), SOURCE_ADMIN)
            .await
            .unwrap();
        assert_eq!(quote.total_amount, Some(360.0));
        assert_eq!(quote.room_category.as_deref(), Some("STANDARD"));
        assert_eq!(quote.status, "PENDING");
    }

    #[actix_rt::test]
    async fn test_convert_creates_guest_and_prebooking() {
        let state = test_state().await;
        let room = seed_room(&state, "102", 2, 200.0).await;
        let quote = insert_quote(&state.db_pool, &quote_body(None, now_secs() + Duration::days(7), 3), SOURCE_WEBSITE)
            .await
            .unwrap();

        let err = convert_quote(state.clone(), web::Path::from(quote.id.clone()), None, owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = ConvertQuoteRequest { room_id: Some(room.clone()), ..Default::default() };
        let resp = convert_quote(state.clone(), web::Path::from(quote.id.clone()), Some(web::Json(body)), owner_request())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = response_json(resp).await;
        assert_eq!(json["data"]["status"], "PRE_BOOKING");
        assert_eq!(json["data"]["source"], "QUOTE");
        assert_eq!(json["data"]["guest_name"], "Renata Gomes");
        assert_eq!(json["data"]["total_amount"], 600.0);

        let stored = fetch_quote(&state.db_pool, &quote.id).await.unwrap();
        assert_eq!(stored.status, "ACCEPTED");
        assert_eq!(stored.booking_id.as_deref(), json["data"]["id"].as_str());

        let err = convert_quote(state.clone(), web::Path::from(quote.id), None, owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[actix_rt::test]
    async fn test_failed_conversion_leaves_nothing_behind() {
        let state = test_state().await;
        let room = seed_room(&state, "103", 2, 200.0).await;
        let holder = seed_guest(&state, "Titular", None).await;
        let start = now_secs() + Duration::days(2);
        seed_booking(&state, &room, &holder, start, start + Duration::days(5), "CONFIRMED").await;

        let quote = insert_quote(&state.db_pool, &quote_body(Some(&room), start + Duration::days(1), 2), SOURCE_ADMIN)
            .await
            .unwrap();
        let err = convert_quote(state.clone(), web::Path::from(quote.id.clone()), None, owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let guests: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM guests").fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(guests.0, 1);
        assert_eq!(fetch_quote(&state.db_pool, &quote.id).await.unwrap().status, "PENDING");
    }

    #[actix_rt::test]
    async fn test_update_cannot_accept_directly() {
        let state = test_state().await;
        let quote = insert_quote(&state.db_pool, &quote_body(None, now_secs() + Duration::days(1), 1), SOURCE_ADMIN)
            .await
            .unwrap();

        let update = UpdateQuoteRequest { status: Some("ACCEPTED".to_string()), ..Default::default() };
        let err = update_quote(state.clone(), web::Path::from(quote.id.clone()), web::Json(update), owner_request())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let update = UpdateQuoteRequest { status: Some("sent".to_string()), ..Default::default() };
        let resp = update_quote(state.clone(), web::Path::from(quote.id), web::Json(update), owner_request()).await.unwrap();
        assert_eq!(response_json(resp).await["data"]["status"], "SENT");

        let query = QuoteQuery { status: Some("SENT".to_string()) };
        let resp = get_quotes(state.clone(), web::Query(query), owner_request()).await.unwrap();
        assert_eq!(response_json(resp).await["data"].as_array().map(|a| a.len()), Some(1));
    }
}
