// src/pool_handlers.rs
//! Swimming pools: register, status and water-quality readings

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;
use log::{info, warn};

use crate::AppState;
use crate::audit::{audit, audit_with_changes, ChangeSet};
use crate::auth::{require_scope, Scope};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::*;
use crate::validation::clean_optional;

async fn fetch_pool(pool: &SqlitePool, id: &str) -> ApiResult<Pool> {
    sqlx::query_as::<_, Pool>("SELECT * FROM pools WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Pool"))
}

async fn ensure_unique_name(pool: &SqlitePool, name: &str, exclude_id: &str) -> ApiResult<()> {
    let existing: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM pools WHERE name = ? COLLATE NOCASE AND id != ?"
    )
    .bind(name)
    .bind(exclude_id)
    .fetch_optional(pool)
    .await?;

    if existing.is_some() {
        return Err(ApiError::conflict(&format!("A pool named '{}' already exists", name)));
    }
    Ok(())
}

pub async fn get_pools(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Pools)?;
    let pools = sqlx::query_as::<_, Pool>("SELECT * FROM pools ORDER BY name")
        .fetch_all(&app_state.db_pool)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(pools)))
}

pub async fn get_pool(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Pools)?;
    let pool = fetch_pool(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(pool)))
}

pub async fn create_pool(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreatePoolRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Pools)?;
    body.validate()?;
    let name = body.name.trim();
    let status = parse_or_default(body.status.as_deref(), PoolStatus::parse, "pool status")?;
    ensure_unique_name(&app_state.db_pool, name, "").await?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO pools (id, name, volume_liters, status, notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#
    )
    .bind(&id)
    .bind(name)
    .bind(body.volume_liters)
    .bind(status.as_str())
    .bind(clean_optional(&body.notes))
    .bind(now)
    .bind(now)
    .execute(&app_state.db_pool)
    .await?;

    audit(&app_state.db_pool, &claims, "create", "pool", &id,
        &format!("Registered pool '{}'", name), &http_request).await;
    info!("🏊 Pool '{}' registered", name);

    let pool = fetch_pool(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(pool)))
}

pub async fn update_pool(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdatePoolRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Pools)?;
    body.validate()?;
    let id = path.into_inner();
    let existing = fetch_pool(&app_state.db_pool, &id).await?;

    let name = match body.name.as_deref().map(str::trim) {
        Some(name) => {
            ensure_unique_name(&app_state.db_pool, name, &id).await?;
            name.to_string()
        }
        None => existing.name.clone(),
    };
    let status = match body.status.as_deref() {
        Some(raw) => parse_or_default(Some(raw), PoolStatus::parse, "pool status")?.as_str().to_string(),
        None => existing.status.clone(),
    };
    let volume_liters = body.volume_liters.or(existing.volume_liters);
    let notes = clean_optional(&body.notes).or_else(|| existing.notes.clone());

    sqlx::query("UPDATE pools SET name = ?, volume_liters = ?, status = ?, notes = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(volume_liters)
        .bind(&status)
        .bind(&notes)
        .bind(Utc::now())
        .bind(&id)
        .execute(&app_state.db_pool)
        .await?;

    let mut cs = ChangeSet::new();
    cs.add("name", &existing.name, &name);
    cs.add("status", &existing.status, &status);
    cs.add_opt("volume_liters", &existing.volume_liters, &volume_liters);
    if !cs.is_empty() {
        audit_with_changes(&app_state.db_pool, &claims, "edit", "pool", &id,
            &format!("Pool '{}' updated: {}", name, cs.to_description()), &cs, &http_request).await;
    }

    let pool = fetch_pool(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(pool)))
}

/// Stores the latest water reading and returns any out-of-range warnings.
pub async fn record_pool_reading(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<PoolReadingRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Pools)?;
    body.validate()?;
    if body.ph.is_none() && body.chlorine.is_none() && body.temperature.is_none() {
        return Err(ApiError::validation("A reading needs at least one of ph, chlorine or temperature"));
    }
    let id = path.into_inner();
    let existing = fetch_pool(&app_state.db_pool, &id).await?;

    let now = Utc::now();
    sqlx::query(
        r#"
        UPDATE pools
        SET ph = COALESCE(?, ph), chlorine = COALESCE(?, chlorine), temperature = COALESCE(?, temperature),
            last_treatment_at = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(body.ph)
    .bind(body.chlorine)
    .bind(body.temperature)
    .bind(now)
    .bind(now)
    .bind(&id)
    .execute(&app_state.db_pool)
    .await?;

    let warnings = reading_warnings(body.ph, body.chlorine);
    if !warnings.is_empty() {
        warn!("🏊 Pool '{}' reading out of range: {}", existing.name, warnings.join("; "));
    }

    let mut parts = Vec::new();
    if let Some(ph) = body.ph {
        parts.push(format!("pH {:.1}", ph));
    }
    if let Some(chlorine) = body.chlorine {
        parts.push(format!("chlorine {:.1} ppm", chlorine));
    }
    if let Some(temperature) = body.temperature {
        parts.push(format!("{:.1} °C", temperature));
    }
    audit(&app_state.db_pool, &claims, "reading", "pool", &id,
        &format!("Reading for '{}': {}", existing.name, parts.join(", ")), &http_request).await;

    let pool = fetch_pool(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(PoolReadingResponse { pool, warnings })))
}

pub async fn delete_pool(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Pools)?;
    let id = path.into_inner();
    let pool = fetch_pool(&app_state.db_pool, &id).await?;

    sqlx::query("DELETE FROM pools WHERE id = ?")
        .bind(&id)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "delete", "pool", &id,
        &format!("Removed pool '{}'", pool.name), &http_request).await;
    info!("🗑️ Pool '{}' removed", pool.name);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Pool deleted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;

    async fn add_pool(state: &web::Data<Arc<AppState>>, name: &str) -> String {
        let body = CreatePoolRequest {
            name: name.to_string(),
            volume_liters: Some(45000.0),
            status: None,
            notes: None,
        };
        let resp = create_pool(state.clone(), web::Json(body), owner_request()).await.unwrap();
        response_json(resp).await["data"]["id"].as_str().unwrap().to_string()
    }

    #[actix_rt::test]
    async fn test_pool_name_unique_case_insensitive() {
        let state = test_state().await;
        let id = add_pool(&state, "Piscina Adulto").await;

        let dup = CreatePoolRequest {
            name: "piscina adulto".to_string(),
            volume_liters: None,
            status: None,
            notes: None,
        };
        let err = create_pool(state.clone(), web::Json(dup), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let pool = fetch_pool(&state.db_pool, &id).await.unwrap();
        assert_eq!(pool.status, "OPEN");
    }

    #[actix_rt::test]
    async fn test_reading_updates_pool_and_warns() {
        let state = test_state().await;
        let id = add_pool(&state, "Piscina Infantil").await;

        let reading = PoolReadingRequest { ph: Some(8.2), chlorine: Some(2.0), temperature: Some(27.5) };
        let resp = record_pool_reading(state.clone(), web::Path::from(id.clone()), web::Json(reading), owner_request())
            .await
            .unwrap();
        let body = response_json(resp).await;
        assert_eq!(body["data"]["pool"]["ph"], 8.2);
        assert!(body["data"]["pool"]["last_treatment_at"].is_string());
        assert_eq!(body["data"]["warnings"].as_array().unwrap().len(), 1);

        // Partial reading keeps previous values
        let reading = PoolReadingRequest { ph: None, chlorine: Some(1.5), temperature: None };
        let resp = record_pool_reading(state.clone(), web::Path::from(id.clone()), web::Json(reading), owner_request())
            .await
            .unwrap();
        let body = response_json(resp).await;
        assert_eq!(body["data"]["pool"]["ph"], 8.2);
        assert_eq!(body["data"]["pool"]["chlorine"], 1.5);
        assert!(body["data"]["warnings"].as_array().unwrap().is_empty());

        let empty = PoolReadingRequest { ph: None, chlorine: None, temperature: None };
        let err = record_pool_reading(state.clone(), web::Path::from(id), web::Json(empty), owner_request())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_rt::test]
    async fn test_invalid_status_rejected() {
        let state = test_state().await;
        let id = add_pool(&state, "Hidromassagem").await;
        let body = UpdatePoolRequest { status: Some("DRAINED".to_string()), ..Default::default() };
        let err = update_pool(state.clone(), web::Path::from(id.clone()), web::Json(body), owner_request())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = UpdatePoolRequest { status: Some("maintenance".to_string()), ..Default::default() };
        let resp = update_pool(state.clone(), web::Path::from(id), web::Json(body), staff_request(vec![Scope::Pools]))
            .await
            .unwrap();
        assert_eq!(response_json(resp).await["data"]["status"], "MAINTENANCE");
    }
}
