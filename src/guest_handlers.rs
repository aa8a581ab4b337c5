// src/guest_handlers.rs
//! Guest registry with document de-duplication

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
use crate::booking_handlers::bookings_for_guest;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginatedResponse, PaginationQuery};
use crate::models::{CreateGuestRequest, Guest, GuestQuery, GuestSummary, UpdateGuestRequest};
use crate::validation::{clean_optional, escape_like_pattern, normalize_document, normalize_email, validate_phone};

const GUEST_SUMMARY_SELECT: &str = r#"
    SELECT g.*, COUNT(b.id) AS bookings_count, MAX(b.check_in) AS last_stay
    FROM guests g
    LEFT JOIN bookings b ON b.guest_id = g.id
"#;

async fn fetch_guest(pool: &SqlitePool, guest_id: &str) -> ApiResult<Guest> {
    sqlx::query_as::<_, Guest>("SELECT * FROM guests WHERE id = ?")
        .bind(guest_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Guest"))
}

async fn ensure_unique_document(pool: &SqlitePool, document: Option<&str>, exclude_id: &str) -> ApiResult<()> {
    let Some(document) = document else { return Ok(()) };
    let duplicate: Option<(String, String)> = sqlx::query_as("SELECT id, name FROM guests WHERE document = ? AND id != ?")
        .bind(document)
        .bind(exclude_id)
        .fetch_optional(pool)
        .await?;

    if let Some((_, name)) = duplicate {
        return Err(ApiError::Conflict(format!("Document already registered for guest '{}'", name)));
    }
    Ok(())
}

fn clean_phone(phone: &Option<String>) -> ApiResult<Option<String>> {
    let phone = clean_optional(phone);
    if let Some(ref p) = phone {
        validate_phone(p)?;
    }
    Ok(phone)
}

/// Contact data used to match or register a guest outside the guest screens.
#[derive(Debug, Default)]
pub struct GuestContact<'a> {
    pub name: &'a str,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub document: Option<&'a str>,
}

/// Finds a guest by document, then by e-mail; registers a new one when neither matches.
pub async fn find_or_create_guest(
    conn: &mut SqliteConnection,
    contact: &GuestContact<'_>,
    created_by: Option<&str>,
) -> ApiResult<String> {
    let document = contact.document.and_then(normalize_document);
    let email = contact.email.and_then(normalize_email);

    if let Some(ref doc) = document {
        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM guests WHERE document = ?")
            .bind(doc)
            .fetch_optional(&mut *conn)
            .await?;
        if let Some((id,)) = existing {
            return Ok(id);
        }
    }

    if let Some(ref mail) = email {
        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM guests WHERE LOWER(email) = ? ORDER BY created_at LIMIT 1"
        )
        .bind(mail)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some((id,)) = existing {
            return Ok(id);
        }
    }

    let name = contact.name.trim();
    if name.chars().count() < 2 {
        return Err(ApiError::validation("Guest name must have at least 2 characters"));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO guests (id, name, email, phone, document, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&id)
    .bind(name)
    .bind(&email)
    .bind(contact.phone.map(str::trim).filter(|p| !p.is_empty()))
    .bind(&document)
    .bind(created_by)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    info!("👤 Registered guest {} ({})", name, id);
    Ok(id)
}

// ==================== LIST / READ ====================

pub async fn get_guests(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<GuestQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Guests)?;
    let (page, per_page, offset) = PaginationQuery::from_parts(query.page, query.per_page).normalize();

    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let pattern = search.map(|s| format!("%{}%", escape_like_pattern(s)));
    let document_pattern = search
        .and_then(normalize_document)
        .map(|d| format!("%{}%", escape_like_pattern(&d)));

    let filter = r#"
        WHERE (?1 IS NULL
               OR g.name LIKE ?1 ESCAPE '\'
               OR g.email LIKE ?1 ESCAPE '\'
               OR g.phone LIKE ?1 ESCAPE '\'
               OR (?2 IS NOT NULL AND g.document LIKE ?2 ESCAPE '\'))
    "#;

    let count_sql = format!("SELECT COUNT(*) FROM guests g {}", filter);
    let total: (i64,) = sqlx::query_as(&count_sql)
        .bind(&pattern)
        .bind(&document_pattern)
        .fetch_one(&app_state.db_pool)
        .await?;

    let sql = format!("{} {} GROUP BY g.id ORDER BY g.name COLLATE NOCASE LIMIT ?3 OFFSET ?4", GUEST_SUMMARY_SELECT, filter);
    let guests = sqlx::query_as::<_, GuestSummary>(&sql)
        .bind(&pattern)
        .bind(&document_pattern)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse::new(guests, total.0, page, per_page))))
}

pub async fn get_guest(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Guests)?;
    let sql = format!("{} WHERE g.id = ? GROUP BY g.id", GUEST_SUMMARY_SELECT);
    let guest = sqlx::query_as::<_, GuestSummary>(&sql)
        .bind(path.into_inner())
        .fetch_optional(&app_state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Guest"))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(guest)))
}

pub async fn get_guest_bookings(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Guests)?;
    let guest_id = path.into_inner();
    fetch_guest(&app_state.db_pool, &guest_id).await?;

    let bookings = bookings_for_guest(&app_state.db_pool, &guest_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(bookings)))
}

// ==================== CREATE / UPDATE / DELETE ====================

pub async fn create_guest(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateGuestRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Guests)?;
    body.validate()?;

    let document = body.document.as_deref().and_then(normalize_document);
    ensure_unique_document(&app_state.db_pool, document.as_deref(), "").await?;
    let phone = clean_phone(&body.phone)?;
    let email = body.email.as_deref().and_then(normalize_email);

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO guests (id, name, email, phone, document, document_type, birth_date, nationality,
                            address, city, state, notes, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    )
    .bind(&id)
    .bind(body.name.trim())
    .bind(&email)
    .bind(&phone)
    .bind(&document)
    .bind(clean_optional(&body.document_type).map(|t| t.to_uppercase()))
    .bind(body.birth_date)
    .bind(clean_optional(&body.nationality))
    .bind(clean_optional(&body.address))
    .bind(clean_optional(&body.city))
    .bind(clean_optional(&body.state))
    .bind(clean_optional(&body.notes))
    .bind(&claims.sub)
    .bind(now)
    .bind(now)
    .execute(&app_state.db_pool)
    .await?;

    let guest = fetch_guest(&app_state.db_pool, &id).await?;
    audit(&app_state.db_pool, &claims, "create", "guest", &id,
        &format!("Registered guest '{}'", guest.name), &http_request).await;
    info!("👤 Guest '{}' registered", guest.name);
    Ok(HttpResponse::Created().json(ApiResponse::success(guest)))
}

pub async fn update_guest(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdateGuestRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Guests)?;
    body.validate()?;
    let guest_id = path.into_inner();
    let existing = fetch_guest(&app_state.db_pool, &guest_id).await?;

    let name = body.name.as_deref().map(str::trim).map(str::to_string).unwrap_or_else(|| existing.name.clone());
    let document = match body.document.as_deref() {
        Some(raw) => normalize_document(raw),
        None => existing.document.clone(),
    };
    ensure_unique_document(&app_state.db_pool, document.as_deref(), &guest_id).await?;

    let email = match body.email.as_deref() {
        Some(raw) => normalize_email(raw),
        None => existing.email.clone(),
    };
    let phone = if body.phone.is_some() { clean_phone(&body.phone)? } else { existing.phone.clone() };
    let document_type = clean_optional(&body.document_type).map(|t| t.to_uppercase()).or_else(|| existing.document_type.clone());
    let birth_date = body.birth_date.or(existing.birth_date);
    let nationality = clean_optional(&body.nationality).or_else(|| existing.nationality.clone());
    let address = clean_optional(&body.address).or_else(|| existing.address.clone());
    let city = clean_optional(&body.city).or_else(|| existing.city.clone());
    let state = clean_optional(&body.state).or_else(|| existing.state.clone());
    let notes = clean_optional(&body.notes).or_else(|| existing.notes.clone());

    let mut cs = ChangeSet::new();
    cs.add("name", &existing.name, &name);
    cs.add_opt("email", &existing.email, &email);
    cs.add_opt("phone", &existing.phone, &phone);
    cs.add_opt("document", &existing.document, &document);
    cs.add_opt("city", &existing.city, &city);

    sqlx::query(
        r#"
        UPDATE guests
        SET name = ?, email = ?, phone = ?, document = ?, document_type = ?, birth_date = ?, nationality = ?,
            address = ?, city = ?, state = ?, notes = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(&name)
    .bind(&email)
    .bind(&phone)
    .bind(&document)
    .bind(&document_type)
    .bind(birth_date)
    .bind(&nationality)
    .bind(&address)
    .bind(&city)
    .bind(&state)
    .bind(&notes)
    .bind(Utc::now())
    .bind(&guest_id)
    .execute(&app_state.db_pool)
    .await?;

    if !cs.is_empty() {
        audit_with_changes(&app_state.db_pool, &claims, "edit", "guest", &guest_id,
            &format!("Guest '{}' updated: {}", name, cs.to_description()), &cs, &http_request).await;
    }

    let guest = fetch_guest(&app_state.db_pool, &guest_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(guest)))
}

pub async fn delete_guest(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Guests)?;
    let guest_id = path.into_inner();
    let guest = fetch_guest(&app_state.db_pool, &guest_id).await?;

    let bookings: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bookings WHERE guest_id = ?")
        .bind(&guest_id)
        .fetch_one(&app_state.db_pool)
        .await?;
    if bookings.0 > 0 {
        return Err(ApiError::Conflict(format!(
            "Guest '{}' has {} booking(s) and cannot be deleted", guest.name, bookings.0
        )));
    }

    sqlx::query("DELETE FROM guests WHERE id = ?")
        .bind(&guest_id)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "delete", "guest", &guest_id,
        &format!("Deleted guest '{}'", guest.name), &http_request).await;
    info!("🗑️ Guest '{}' deleted", guest.name);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Guest deleted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;
    use chrono::Duration;

    fn guest_body(name: &str, document: Option<&str>) -> CreateGuestRequest {
        CreateGuestRequest {
            name: name.to_string(),
            document: document.map(str::to_string),
            email: Some("Hospede@Email.com".to_string()),
            phone: Some("(31) 99999-0000".to_string()),
            ..Default::default()
        }
    }

    #[actix_rt::test]
    async fn test_document_is_normalized_and_unique() {
        let state = test_state().await;

        let resp = create_guest(state.clone(), web::Json(guest_body("Ana Paula", Some("123.456.789-09"))), owner_request())
            .await
            .unwrap();
        let body = response_json(resp).await;
        assert_eq!(body["data"]["document"], "12345678909");
        assert_eq!(body["data"]["email"], "hospede@email.com");

        let err = create_guest(state.clone(), web::Json(guest_body("Outra Pessoa", Some("12345678909"))), owner_request())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[actix_rt::test]
    async fn test_search_matches_name_and_formatted_document() {
        let state = test_state().await;
        seed_guest(&state, "Mariana Costa", Some("98765432155")).await;
        seed_guest(&state, "José 100%", None).await;
        seed_guest(&state, "Fernando Melo", None).await;

        let query = GuestQuery { search: Some("987.654".to_string()), ..Default::default() };
        let body = response_json(get_guests(state.clone(), web::Query(query), owner_request()).await.unwrap()).await;
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["data"][0]["name"], "Mariana Costa");

        // `%` is matched literally
        let query = GuestQuery { search: Some("100%".to_string()), ..Default::default() };
        let body = response_json(get_guests(state.clone(), web::Query(query), owner_request()).await.unwrap()).await;
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["data"][0]["name"], "José 100%");
    }

    #[actix_rt::test]
    async fn test_delete_rejected_with_bookings() {
        let state = test_state().await;
        let room = seed_room(&state, "101", 2, 200.0).await;
        let guest = seed_guest(&state, "Cláudio Ramos", None).await;
        let now = now_secs();
        seed_booking(&state, &room, &guest, now, now + Duration::days(1), "CANCELLED").await;

        let err = delete_guest(state.clone(), web::Path::from(guest.clone()), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let resp = get_guest(state.clone(), web::Path::from(guest.clone()), owner_request()).await.unwrap();
        assert_eq!(response_json(resp).await["data"]["bookings_count"], 1);

        let resp = get_guest_bookings(state.clone(), web::Path::from(guest), owner_request()).await.unwrap();
        assert_eq!(response_json(resp).await["data"].as_array().map(|a| a.len()), Some(1));
    }

    #[actix_rt::test]
    async fn test_find_or_create_reuses_existing_guest() {
        let state = test_state().await;
        let existing = seed_guest(&state, "Sofia Martins", Some("MG1234567")).await;
        let mut conn = state.db_pool.acquire().await.unwrap();

        let contact = GuestContact { name: "Sofia M.", document: Some("mg-1234567"), ..Default::default() };
        let found = find_or_create_guest(&mut conn, &contact, None).await.unwrap();
        assert_eq!(found, existing);

        let contact = GuestContact { name: "Novo Hóspede", email: Some("NOVO@site.com"), ..Default::default() };
        let created = find_or_create_guest(&mut conn, &contact, None).await.unwrap();
        assert_ne!(created, existing);
        let again = GuestContact { name: "Novo", email: Some("novo@site.com"), ..Default::default() };
        assert_eq!(find_or_create_guest(&mut conn, &again, None).await.unwrap(), created);
    }

    #[actix_rt::test]
    async fn test_guest_writes_require_scope() {
        let state = test_state().await;
        let err = create_guest(state.clone(), web::Json(guest_body("Sem Acesso", None)), staff_request(vec![Scope::Rooms]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        assert!(create_guest(state.clone(), web::Json(guest_body("Com Acesso", None)), staff_request(vec![Scope::Guests]))
            .await
            .is_ok());
    }

    #[actix_rt::test]
    async fn test_guest_reads_require_scope() {
        let state = test_state().await;
        let guest_id = seed_guest(&state, "Ana Souza", Some("111.222.333-44")).await;

        let err = get_guests(state.clone(), web::Query(GuestQuery::default()), staff_request(vec![Scope::Rooms]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        let err = get_guest(state.clone(), web::Path::from(guest_id.clone()), staff_request(vec![Scope::Stock]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        let err = get_guest_bookings(state.clone(), web::Path::from(guest_id.clone()), staff_request(vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let body = response_json(
            get_guest(state.clone(), web::Path::from(guest_id), staff_request(vec![Scope::Guests])).await.unwrap(),
        ).await;
        assert_eq!(body["data"]["name"], "Ana Souza");
    }
}
