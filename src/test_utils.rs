// src/test_utils.rs - shared fixtures for handler tests
#![cfg(test)]

use actix_web::{test::TestRequest, web, HttpMessage, HttpRequest, HttpResponse};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{AuthService, Claims, Scope, UserRole};
use crate::config::Config;
use crate::db::run_migrations;
use crate::AppState;

/// Single-connection in-memory database; the connection must never be recycled.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    run_migrations(&pool).await.expect("migrations");
    pool
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.bcrypt_cost = 4;
    config.setup.secret = Some("test-setup-secret-0123".to_string());
    config
}

pub async fn test_state() -> web::Data<Arc<AppState>> {
    web::Data::new(Arc::new(AppState {
        db_pool: test_pool().await,
        config: test_config(),
    }))
}

pub fn test_auth_service() -> web::Data<Arc<AuthService>> {
    web::Data::new(Arc::new(AuthService::new(&test_config().auth)))
}

pub fn claims_for(user_id: &str, role: UserRole, permissions: Vec<Scope>) -> Claims {
    let now = Utc::now();
    Claims {
        sub: user_id.to_string(),
        username: format!("{}-user", role.as_str().to_lowercase()),
        role,
        permissions,
        sid: Uuid::new_v4().to_string(),
        exp: (now + Duration::hours(1)).timestamp(),
        iat: now.timestamp(),
    }
}

pub fn request_with(claims: Claims) -> HttpRequest {
    let req = TestRequest::default().to_http_request();
    req.extensions_mut().insert(claims);
    req
}

pub fn owner_request() -> HttpRequest {
    request_with(claims_for("owner-1", UserRole::Owner, vec![]))
}

pub fn staff_request(permissions: Vec<Scope>) -> HttpRequest {
    request_with(claims_for("staff-1", UserRole::User, permissions))
}

pub fn anonymous_request() -> HttpRequest {
    TestRequest::default().to_http_request()
}

pub async fn response_json(resp: HttpResponse) -> serde_json::Value {
    let bytes = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn response_text(resp: HttpResponse) -> String {
    let bytes = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Whole seconds keep stored timestamps free of sub-second noise.
pub fn now_secs() -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap()
}

pub async fn seed_room(state: &AppState, number: &str, capacity: i64, daily_rate: f64) -> String {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO rooms (id, number, name, category, capacity, daily_rate, status, created_at, updated_at) VALUES (?, ?, ?, 'STANDARD', ?, ?, 'AVAILABLE', ?, ?)"
    )
        .bind(&id)
        .bind(number)
        .bind(format!("Quarto {}", number))
        .bind(capacity)
        .bind(daily_rate)
        .bind(now)
        .bind(now)
        .execute(&state.db_pool)
        .await
        .unwrap();
    id
}

pub async fn seed_guest(state: &AppState, name: &str, document: Option<&str>) -> String {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query("INSERT INTO guests (id, name, document, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(document)
        .bind(now)
        .bind(now)
        .execute(&state.db_pool)
        .await
        .unwrap();
    id
}

pub async fn seed_booking(
    state: &AppState,
    room_id: &str,
    guest_id: &str,
    check_in: DateTime<Utc>,
    check_out: DateTime<Utc>,
    status: &str,
) -> String {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"INSERT INTO bookings (id, room_id, guest_id, check_in, check_out, adults, children, status, total_amount, paid_amount, source, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, 2, 0, ?, 500, 0, 'ADMIN', ?, ?)"#
    )
        .bind(&id)
        .bind(room_id)
        .bind(guest_id)
        .bind(check_in)
        .bind(check_out)
        .bind(status)
        .bind(now)
        .bind(now)
        .execute(&state.db_pool)
        .await
        .unwrap();
    id
}

pub async fn seed_user(state: &AppState, username: &str, role: UserRole) -> String {
    let auth = AuthService::new(&state.config.auth);
    let hash = auth.hash_password("Senha123").unwrap();
    let user = crate::auth::User::insert(
        &state.db_pool,
        username,
        &format!("{}@pousada.com.br", username),
        None,
        &hash,
        role,
        &[],
    )
    .await
    .unwrap();
    user.id
}
