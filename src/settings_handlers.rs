// src/settings_handlers.rs
//! Property settings (single organization row)

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use chrono::Utc;
use sqlx::SqlitePool;
use validator::Validate;
use log::info;

use crate::AppState;
use crate::audit::{audit_with_changes, ChangeSet};
use crate::auth::{get_current_user, require_scope, Scope};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::*;
use crate::validation::{clean_optional, normalize_document, normalize_email, validate_clock_time, validate_phone};

pub async fn load_organization(pool: &SqlitePool) -> ApiResult<Organization> {
    sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = ?")
        .bind(DEFAULT_ORGANIZATION_ID)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Organization"))
}

pub async fn get_organization(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let organization = load_organization(&app_state.db_pool).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(organization)))
}

pub async fn update_organization(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<UpdateOrganizationRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Settings)?;
    body.validate()?;
    let existing = load_organization(&app_state.db_pool).await?;

    let check_in_time = match clean_optional(&body.check_in_time) {
        Some(t) => {
            validate_clock_time(&t)?;
            t
        }
        None => existing.check_in_time.clone(),
    };
    let check_out_time = match clean_optional(&body.check_out_time) {
        Some(t) => {
            validate_clock_time(&t)?;
            t
        }
        None => existing.check_out_time.clone(),
    };
    let phone = match clean_optional(&body.phone) {
        Some(p) => {
            validate_phone(&p)?;
            Some(p)
        }
        None => existing.phone.clone(),
    };
    let document = match body.document.as_deref() {
        Some(raw) => Some(
            normalize_document(raw).ok_or_else(|| ApiError::validation("Document must contain letters or digits"))?,
        ),
        None => existing.document.clone(),
    };

    let name = body.name.as_deref().map(str::trim).map(str::to_string).unwrap_or_else(|| existing.name.clone());
    let legal_name = clean_optional(&body.legal_name).or_else(|| existing.legal_name.clone());
    let email = body.email.as_deref().and_then(normalize_email).or_else(|| existing.email.clone());
    let address = clean_optional(&body.address).or_else(|| existing.address.clone());
    let city = clean_optional(&body.city).or_else(|| existing.city.clone());
    let state = clean_optional(&body.state).or_else(|| existing.state.clone());
    let tax_rate = body.tax_rate.or(existing.tax_rate);

    sqlx::query(
        r#"
        UPDATE organizations
        SET name = ?, legal_name = ?, document = ?, email = ?, phone = ?, address = ?, city = ?, state = ?,
            tax_rate = ?, check_in_time = ?, check_out_time = ?, updated_by = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(&name)
    .bind(&legal_name)
    .bind(&document)
    .bind(&email)
    .bind(&phone)
    .bind(&address)
    .bind(&city)
    .bind(&state)
    .bind(tax_rate)
    .bind(&check_in_time)
    .bind(&check_out_time)
    .bind(&claims.sub)
    .bind(Utc::now())
    .bind(DEFAULT_ORGANIZATION_ID)
    .execute(&app_state.db_pool)
    .await?;

    let mut cs = ChangeSet::new();
    cs.add("name", &existing.name, &name);
    cs.add_opt("legal_name", &existing.legal_name, &legal_name);
    cs.add_opt("document", &existing.document, &document);
    cs.add_opt("email", &existing.email, &email);
    cs.add_opt("phone", &existing.phone, &phone);
    cs.add_opt("address", &existing.address, &address);
    cs.add_opt("city", &existing.city, &city);
    cs.add_opt("state", &existing.state, &state);
    cs.add_opt("tax_rate", &existing.tax_rate, &tax_rate);
    cs.add("check_in_time", &existing.check_in_time, &check_in_time);
    cs.add("check_out_time", &existing.check_out_time, &check_out_time);

    if !cs.is_empty() {
        audit_with_changes(&app_state.db_pool, &claims, "edit", "organization", DEFAULT_ORGANIZATION_ID,
            &format!("Settings updated: {}", cs.to_description()), &cs, &http_request).await;
        info!("⚙️ Organization settings updated by {}", claims.username);
    }

    let organization = load_organization(&app_state.db_pool).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(organization)))
}
