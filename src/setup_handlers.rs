// src/setup_handlers.rs
//! First-run seeding and diagnostics, guarded by a shared secret

use actix_web::{web, HttpResponse};
use std::sync::Arc;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;
use log::{info, warn};

use crate::AppState;
use crate::auth::{AuthService, User, UserRole};
use crate::auth_handlers::generate_password;
use crate::db::table_row_counts;
use crate::error::{ApiError, ApiResult};
use crate::financial_handlers::ensure_expense_category;
use crate::handlers::ApiResponse;
use crate::models::{DEFAULT_EXPENSE_CATEGORIES, DEFAULT_STOCK_CATEGORIES};

pub const DEFAULT_OWNER_USERNAME: &str = "admin";
const DEFAULT_OWNER_EMAIL: &str = "admin@pousada.local";

#[derive(Debug, Deserialize)]
pub struct SetupQuery {
    pub secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TableCount {
    pub table: String,
    pub rows: i64,
}

#[derive(Debug, Serialize)]
pub struct Diagnosis {
    pub database: String,
    pub tables: Vec<TableCount>,
    pub checked_at: chrono::DateTime<Utc>,
}

/// Credentials of an owner account created by the seeding routines.
/// The password is only ever returned here.
#[derive(Debug, Serialize)]
pub struct OwnerCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Default)]
pub struct SeedReport {
    pub expense_categories_created: u64,
    pub stock_categories_created: u64,
    pub owner: Option<OwnerCredentials>,
}

fn check_secret(app_state: &AppState, query: &SetupQuery) -> ApiResult<()> {
    let expected = app_state
        .config
        .setup
        .secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::forbidden("Setup endpoints are disabled"))?;

    match query.secret.as_deref() {
        Some(given) if given == expected => Ok(()),
        _ => {
            warn!("Rejected setup request with a wrong or missing secret");
            Err(ApiError::forbidden("Invalid setup secret"))
        }
    }
}

/// Creates the first OWNER account when the users table is empty.
/// Returns the credentials when an account was created.
pub async fn ensure_owner_account(
    pool: &SqlitePool,
    auth_service: &AuthService,
    password: Option<String>,
) -> ApiResult<Option<OwnerCredentials>> {
    let (users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    if users > 0 {
        return Ok(None);
    }

    let password = password.filter(|p| !p.is_empty()).unwrap_or_else(generate_password);
    let hash = auth_service.hash_password(&password)?;
    User::insert(
        pool,
        DEFAULT_OWNER_USERNAME,
        DEFAULT_OWNER_EMAIL,
        Some(UserRole::Owner.display_name()),
        &hash,
        UserRole::Owner,
        &[],
    )
    .await?;

    info!("👤 Default owner account '{}' created", DEFAULT_OWNER_USERNAME);
    Ok(Some(OwnerCredentials {
        username: DEFAULT_OWNER_USERNAME.to_string(),
        password,
    }))
}

pub async fn diagnose(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<SetupQuery>,
) -> ApiResult<HttpResponse> {
    check_secret(&app_state, &query)?;

    let (database, tables) = match table_row_counts(&app_state.db_pool).await {
        Ok(counts) => (
            "ok".to_string(),
            counts.into_iter().map(|(table, rows)| TableCount { table, rows }).collect(),
        ),
        Err(e) => {
            log::error!("Diagnostics failed: {}", e);
            (format!("error: {}", e), Vec::new())
        }
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(Diagnosis {
        database,
        tables,
        checked_at: Utc::now(),
    })))
}

/// Idempotent: re-running only fills in what is missing.
pub async fn seed(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    query: web::Query<SetupQuery>,
) -> ApiResult<HttpResponse> {
    check_secret(&app_state, &query)?;
    let mut report = SeedReport::default();

    let mut tx = app_state.db_pool.begin().await?;
    for name in DEFAULT_EXPENSE_CATEGORIES {
        let (exists,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM expense_categories WHERE name = ?")
            .bind(*name)
            .fetch_one(&mut *tx)
            .await?;
        if exists == 0 {
            ensure_expense_category(&mut tx, name).await?;
            report.expense_categories_created += 1;
        }
    }

    let now = Utc::now();
    for name in DEFAULT_STOCK_CATEGORIES {
        report.stock_categories_created += sqlx::query(
            "INSERT OR IGNORE INTO stock_categories (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)"
        )
        .bind(Uuid::new_v4().to_string())
        .bind(*name)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }
    tx.commit().await?;

    report.owner = ensure_owner_account(&app_state.db_pool, &auth_service, None).await?;

    info!(
        "🌱 Seed finished: {} expense categories, {} stock categories, owner created: {}",
        report.expense_categories_created,
        report.stock_categories_created,
        report.owner.is_some()
    );
    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;

    fn with_secret(secret: Option<&str>) -> web::Query<SetupQuery> {
        web::Query(SetupQuery { secret: secret.map(str::to_string) })
    }

    #[actix_rt::test]
    async fn test_secret_required() {
        let state = test_state().await;
        let err = diagnose(state.clone(), with_secret(None)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        let err = diagnose(state.clone(), with_secret(Some("wrong"))).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let resp = diagnose(state.clone(), with_secret(Some("test-setup-secret-0123"))).await.unwrap();
        let body = response_json(resp).await;
        assert_eq!(body["data"]["database"], "ok");
        assert!(!body["data"]["tables"].as_array().unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn test_unconfigured_secret_disables_setup() {
        let mut config = test_config();
        config.setup.secret = None;
        let state = web::Data::new(Arc::new(AppState { db_pool: test_pool().await, config }));

        let err = diagnose(state.clone(), with_secret(Some("test-setup-secret-0123"))).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[actix_rt::test]
    async fn test_seed_is_idempotent() {
        let state = test_state().await;
        let auth = test_auth_service();

        let body = response_json(seed(state.clone(), auth.clone(), with_secret(Some("test-setup-secret-0123"))).await.unwrap()).await;
        assert_eq!(body["data"]["expense_categories_created"], DEFAULT_EXPENSE_CATEGORIES.len() as u64);
        assert_eq!(body["data"]["stock_categories_created"], DEFAULT_STOCK_CATEGORIES.len() as u64);
        assert_eq!(body["data"]["owner"]["username"], DEFAULT_OWNER_USERNAME);
        let password = body["data"]["owner"]["password"].as_str().unwrap().to_string();

        let user = User::find_by_username(&state.db_pool, DEFAULT_OWNER_USERNAME).await.unwrap();
        assert_eq!(user.get_role(), UserRole::Owner);
        assert!(auth.verify_password(&password, &user.password_hash).unwrap());

        let body = response_json(seed(state.clone(), auth, with_secret(Some("test-setup-secret-0123"))).await.unwrap()).await;
        assert_eq!(body["data"]["expense_categories_created"], 0);
        assert_eq!(body["data"]["stock_categories_created"], 0);
        assert!(body["data"]["owner"].is_null());
    }

    #[actix_rt::test]
    async fn test_owner_not_created_when_users_exist() {
        let state = test_state().await;
        seed_user(&state, "recepcao", UserRole::User).await;
        let created = ensure_owner_account(&state.db_pool, &test_auth_service(), Some("Senha123".to_string()))
            .await
            .unwrap();
        assert!(created.is_none());
    }
}
