// src/auth_handlers.rs - Login, sessions and user administration

use actix_web::{web, HttpRequest, HttpResponse};
use validator::Validate;
use std::sync::Arc;
use chrono::{Duration, Utc};
use serde::{Serialize, Deserialize};
use sqlx::SqlitePool;
use strum::IntoEnumIterator;

use crate::handlers::ApiResponse;
use crate::audit::{audit, audit_with_changes, log_activity, ChangeSet};
use crate::auth::{
    create_session, get_current_user, parse_permissions, permissions_to_json, require_manager,
    revoke_session, revoke_user_sessions, validate_password_strength, AuthService,
    ChangePasswordRequest, Claims, LoginRequest, LoginResponse, Scope, User, UserInfo, UserRole,
};
use crate::config::generate_secret;
use crate::error::{ApiError, ApiResult};
use crate::validation::{clean_optional, normalize_email};
use crate::AppState;

// ======== REQUEST STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    pub username: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(max = 255, message = "Full name cannot exceed 255 characters"))]
    pub full_name: Option<String>,
    /// Generated when absent and returned once in the response.
    pub password: Option<String>,
    #[validate(length(min = 1, message = "Role is required"))]
    pub role: String,
    pub permissions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Validate, Default)]
pub struct UpdateUserRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    #[validate(length(max = 255, message = "Full name cannot exceed 255 characters"))]
    pub full_name: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePermissionsRequest {
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ResetPasswordRequest {
    pub new_password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub user: UserInfo,
    pub generated_password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScopeInfo {
    pub name: &'static str,
    pub description: &'static str,
}

// ======== HELPERS ========

/// Random password that satisfies `validate_password_strength`.
pub fn generate_password() -> String {
    loop {
        let candidate = generate_secret(14);
        if validate_password_strength(&candidate).is_ok() {
            return candidate;
        }
    }
}

fn parse_role(raw: &str) -> ApiResult<UserRole> {
    UserRole::from_str(raw)
        .ok_or_else(|| ApiError::ValidationError("Invalid role. Must be: OWNER, ADMIN or USER".to_string()))
}

fn parse_scope_list(names: &[String]) -> ApiResult<Vec<Scope>> {
    names
        .iter()
        .map(|name| {
            Scope::parse(name).ok_or_else(|| ApiError::ValidationError(format!("Unknown permission scope: '{}'", name)))
        })
        .collect()
}

async fn active_owner_count(pool: &SqlitePool) -> ApiResult<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'OWNER' AND is_active = 1")
        .fetch_one(pool)
        .await?;
    Ok(count.0)
}

/// The acting manager must outrank the target account.
fn ensure_can_manage(claims: &Claims, target: &User) -> ApiResult<()> {
    if !claims.role.can_manage_role(target.get_role()) {
        return Err(ApiError::forbidden("You cannot manage accounts with this role"));
    }
    Ok(())
}

// ======== AUTH HANDLERS ========

pub async fn login(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<LoginRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    let pool = &app_state.db_pool;
    let auth_config = &app_state.config.auth;

    let mut user = User::find_by_username(pool, request.username.trim()).await
        .map_err(|_| ApiError::AuthError("Invalid username or password".to_string()))?;

    if user.is_locked() {
        return Err(ApiError::AuthError("Account is temporarily locked. Try again later.".to_string()));
    }

    if !user.is_active {
        return Err(ApiError::AuthError("Account is disabled".to_string()));
    }

    if !auth_service.verify_password(&request.password, &user.password_hash)? {
        user.increment_failed_attempts(pool).await?;
        log::warn!("Failed login for {} ({} attempts)", user.username, user.failed_login_attempts);

        if user.failed_login_attempts >= auth_config.max_login_attempts as i64 {
            user.lock_for_duration(pool, Duration::minutes(auth_config.lockout_duration_minutes)).await?;
            if let Err(e) = log_activity(pool, Some(&user.id), "lock", "user", Some(&user.id),
                Some("Account locked after repeated failed logins"), None, Some(&http_request)).await {
                log::error!("Failed to write audit log: {}", e);
            }
            return Err(ApiError::AuthError(format!(
                "Account locked due to too many failed attempts. Try again in {} minutes.",
                auth_config.lockout_duration_minutes
            )));
        }

        return Err(ApiError::AuthError("Invalid username or password".to_string()));
    }

    user.reset_failed_attempts(pool).await?;
    user.update_last_login(pool).await?;

    let (session_id, expires_at) = create_session(pool, &user.id, auth_service.token_ttl(), Some(&http_request)).await?;
    let token = auth_service.generate_token(&user, &session_id, expires_at)?;

    if let Err(e) = log_activity(pool, Some(&user.id), "login", "user", Some(&user.id),
        Some("Signed in"), None, Some(&http_request)).await {
        log::error!("Failed to write audit log: {}", e);
    }
    log::info!("User {} logged in successfully", user.username);

    let response = LoginResponse {
        token,
        expires_in: auth_service.token_ttl().num_seconds(),
        user: user.into(),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        response,
        "Login successful".to_string(),
    )))
}

pub async fn logout(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    revoke_session(&app_state.db_pool, &claims.sid).await?;

    audit(&app_state.db_pool, &claims, "logout", "user", &claims.sub, "Signed out", &http_request).await;
    log::info!("User {} logged out", claims.username);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Logged out".to_string())))
}

pub async fn get_profile(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let user = User::find_by_id(&app_state.db_pool, &claims.sub).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(UserInfo::from(user))))
}

/// Changes the caller's password and ends their other sessions.
pub async fn change_password(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<ChangePasswordRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    let claims = get_current_user(&http_request)?;
    let user = User::find_by_id(&app_state.db_pool, &claims.sub).await?;

    user.change_password(&app_state.db_pool, &request.current_password, &request.new_password, &auth_service).await?;

    sqlx::query("UPDATE sessions SET revoked_at = ? WHERE user_id = ? AND id != ? AND revoked_at IS NULL")
        .bind(Utc::now())
        .bind(&user.id)
        .bind(&claims.sid)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "password", "user", &user.id, "Changed own password", &http_request).await;
    log::info!("User {} changed password", user.username);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Password changed".to_string())))
}

pub async fn get_scopes(http_request: HttpRequest) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let scopes: Vec<ScopeInfo> = Scope::iter()
        .map(|s| ScopeInfo { name: s.as_str(), description: s.description() })
        .collect();
    Ok(HttpResponse::Ok().json(ApiResponse::success(scopes)))
}

// ======== USER ADMINISTRATION ========

pub async fn get_users(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_manager(&http_request)?;

    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY username")
        .fetch_all(&app_state.db_pool)
        .await?;
    let users: Vec<UserInfo> = users.into_iter().map(UserInfo::from).collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(users)))
}

pub async fn get_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_manager(&http_request)?;
    let user = User::find_by_id(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(UserInfo::from(user))))
}

pub async fn create_user(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<CreateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_manager(&http_request)?;
    request.validate()?;

    let role = parse_role(&request.role)?;
    if !claims.role.can_manage_role(role) {
        return Err(ApiError::forbidden("Only the owner can create owner or admin accounts"));
    }

    let permissions = match request.permissions {
        Some(ref names) => parse_scope_list(names)?,
        None => Vec::new(),
    };

    let email = normalize_email(&request.email)
        .ok_or_else(|| ApiError::validation("Invalid email format"))?;

    let (password, generated) = match request.password.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => (p.to_string(), false),
        None => (generate_password(), true),
    };
    let hash = auth_service.hash_password(&password)?;

    let user = User::insert(
        &app_state.db_pool,
        request.username.trim(),
        &email,
        clean_optional(&request.full_name).as_deref(),
        &hash,
        role,
        &permissions,
    )
    .await?;

    audit(&app_state.db_pool, &claims, "create", "user", &user.id,
        &format!("Created user {} ({})", user.username, role), &http_request).await;
    log::info!("{} created user {} with role {}", claims.username, user.username, role);

    let response = CreateUserResponse {
        user: user.into(),
        generated_password: generated.then_some(password),
    };
    Ok(HttpResponse::Created().json(ApiResponse::success(response)))
}

pub async fn update_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_manager(&http_request)?;
    request.validate()?;
    let pool = &app_state.db_pool;
    let user_id = path.into_inner();

    let user = User::find_by_id(pool, &user_id).await?;
    ensure_can_manage(&claims, &user)?;

    let current_role = user.get_role();
    let new_role = match request.role.as_deref() {
        Some(raw) => parse_role(raw)?,
        None => current_role,
    };
    if !claims.role.can_manage_role(new_role) {
        return Err(ApiError::forbidden("Only the owner can grant owner or admin roles"));
    }

    let new_active = request.is_active.unwrap_or(user.is_active);
    if user_id == claims.sub && !new_active {
        return Err(ApiError::bad_request("You cannot deactivate your own account"));
    }

    let loses_owner = current_role == UserRole::Owner
        && user.is_active
        && (new_role != UserRole::Owner || !new_active);
    if loses_owner && active_owner_count(pool).await? <= 1 {
        return Err(ApiError::conflict("The last active owner cannot be demoted or deactivated"));
    }

    let email = match request.email.as_deref() {
        Some(raw) => normalize_email(raw).ok_or_else(|| ApiError::validation("Invalid email format"))?,
        None => user.email.clone(),
    };
    let full_name = clean_optional(&request.full_name).or_else(|| user.full_name.clone());

    let mut cs = ChangeSet::new();
    cs.add("email", &user.email, &email);
    cs.add_opt("full_name", &user.full_name, &full_name);
    cs.add("role", &current_role.as_str(), &new_role.as_str());
    cs.add("is_active", &user.is_active, &new_active);

    sqlx::query("UPDATE users SET email = ?, full_name = ?, role = ?, is_active = ?, updated_at = ? WHERE id = ?")
        .bind(&email)
        .bind(&full_name)
        .bind(new_role.as_str())
        .bind(new_active)
        .bind(Utc::now())
        .bind(&user_id)
        .execute(pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.message().contains("UNIQUE") => ApiError::conflict("Email already in use"),
            _ => ApiError::from(e),
        })?;

    // Tokens carry the role, so a role or status change forces a new login
    if new_role != current_role || new_active != user.is_active {
        let revoked = revoke_user_sessions(pool, &user_id).await?;
        log::info!("Revoked {} session(s) of {}", revoked, user.username);
    }

    let updated = User::find_by_id(pool, &user_id).await?;
    audit_with_changes(pool, &claims, "edit", "user", &user_id,
        &format!("User {} updated: {}", updated.username, cs.to_description()), &cs, &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(UserInfo::from(updated))))
}

pub async fn update_user_permissions(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdatePermissionsRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_manager(&http_request)?;
    let pool = &app_state.db_pool;
    let user_id = path.into_inner();

    let user = User::find_by_id(pool, &user_id).await?;
    ensure_can_manage(&claims, &user)?;
    if user.get_role().is_manager() {
        return Err(ApiError::bad_request("Owners and admins already hold every scope"));
    }

    let scopes = parse_scope_list(&request.permissions)?;
    let old = parse_permissions(&user.permissions);
    let new_json = permissions_to_json(&scopes);

    sqlx::query("UPDATE users SET permissions = ?, updated_at = ? WHERE id = ?")
        .bind(&new_json)
        .bind(Utc::now())
        .bind(&user_id)
        .execute(pool)
        .await?;

    revoke_user_sessions(pool, &user_id).await?;

    let mut cs = ChangeSet::new();
    cs.add("permissions", &permissions_to_json(&old), &new_json);
    audit_with_changes(pool, &claims, "permissions", "user", &user_id,
        &format!("Permissions of {} set to {}", user.username, new_json), &cs, &http_request).await;

    let updated = User::find_by_id(pool, &user_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(UserInfo::from(updated))))
}

/// Sets a new password (given or generated), clears the lockout and ends every session.
pub async fn reset_user_password(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    path: web::Path<String>,
    request: Option<web::Json<ResetPasswordRequest>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_manager(&http_request)?;
    let pool = &app_state.db_pool;
    let user_id = path.into_inner();

    let mut user = User::find_by_id(pool, &user_id).await?;
    ensure_can_manage(&claims, &user)?;

    let requested = request
        .and_then(|r| r.into_inner().new_password)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    let (password, generated) = match requested {
        Some(p) => (p, false),
        None => (generate_password(), true),
    };

    let hash = auth_service.hash_password(&password)?;
    user.set_password(pool, &hash).await?;
    user.reset_failed_attempts(pool).await?;
    revoke_user_sessions(pool, &user_id).await?;

    audit(pool, &claims, "password", "user", &user_id,
        &format!("Password of {} reset", user.username), &http_request).await;
    log::info!("{} reset the password of {}", claims.username, user.username);

    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "user_id": user_id,
        "generated_password": generated.then_some(password),
    }))))
}

pub async fn delete_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_manager(&http_request)?;
    let pool = &app_state.db_pool;
    let user_id = path.into_inner();

    if user_id == claims.sub {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    let user = User::find_by_id(pool, &user_id).await?;
    ensure_can_manage(&claims, &user)?;

    if user.get_role() == UserRole::Owner && user.is_active && active_owner_count(pool).await? <= 1 {
        return Err(ApiError::conflict("The last active owner cannot be removed"));
    }

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&user_id)
        .execute(pool)
        .await?;

    audit(pool, &claims, "delete", "user", &user_id,
        &format!("Deleted user {}", user.username), &http_request).await;
    log::info!("{} deleted user {}", claims.username, user.username);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "User deleted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;
    use actix_web::test::TestRequest;

    fn login_body(username: &str, password: &str) -> web::Json<LoginRequest> {
        web::Json(LoginRequest { username: username.to_string(), password: password.to_string() })
    }

    #[test]
    fn test_generate_password_is_strong() {
        for _ in 0..20 {
            assert!(validate_password_strength(&generate_password()).is_ok());
        }
    }

    #[actix_rt::test]
    async fn test_login_creates_live_session() {
        let state = test_state().await;
        let auth = test_auth_service();
        seed_user(&state, "recepcao", UserRole::User).await;

        let resp = login(state.clone(), auth.clone(), login_body("recepcao", "Senha123"),
            TestRequest::default().to_http_request()).await.unwrap();
        let body = response_json(resp).await;
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let claims = auth.verify_token(&token).unwrap();
        assert!(crate::auth::is_session_active(&state.db_pool, &claims.sid, &claims.sub).await.unwrap());

        let logout_resp = logout(state.clone(), request_with(claims.clone())).await.unwrap();
        assert_eq!(logout_resp.status(), StatusCode::OK);
        assert!(!crate::auth::is_session_active(&state.db_pool, &claims.sid, &claims.sub).await.unwrap());
    }

    #[actix_rt::test]
    async fn test_login_locks_after_repeated_failures() {
        let state = test_state().await;
        let auth = test_auth_service();
        seed_user(&state, "governanca", UserRole::User).await;

        for _ in 0..state.config.auth.max_login_attempts {
            let err = login(state.clone(), auth.clone(), login_body("governanca", "Errada123"),
                TestRequest::default().to_http_request()).await.unwrap_err();
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        }

        // Even the right password is refused while locked
        let err = login(state.clone(), auth.clone(), login_body("governanca", "Senha123"),
            TestRequest::default().to_http_request()).await.unwrap_err();
        assert!(err.to_string().contains("locked"));
    }

    #[actix_rt::test]
    async fn test_admin_cannot_create_owner() {
        let state = test_state().await;
        let auth = test_auth_service();
        let admin = request_with(claims_for("admin-1", UserRole::Admin, vec![]));

        let request = CreateUserRequest {
            username: "novodono".to_string(),
            email: "dono@pousada.com.br".to_string(),
            full_name: None,
            password: None,
            role: "OWNER".to_string(),
            permissions: None,
        };
        let err = create_user(state.clone(), auth.clone(), web::Json(request), admin).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[actix_rt::test]
    async fn test_create_user_generates_password_and_scopes() {
        let state = test_state().await;
        let auth = test_auth_service();

        let request = CreateUserRequest {
            username: "camareira".to_string(),
            email: "Camareira@Pousada.com.br".to_string(),
            full_name: Some("Joana".to_string()),
            password: None,
            role: "user".to_string(),
            permissions: Some(vec!["rooms".to_string(), "stock".to_string()]),
        };
        let resp = create_user(state.clone(), auth.clone(), web::Json(request), owner_request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = response_json(resp).await;
        assert_eq!(body["data"]["user"]["email"], "camareira@pousada.com.br");
        assert_eq!(body["data"]["user"]["permissions"], serde_json::json!(["rooms", "stock"]));
        let password = body["data"]["generated_password"].as_str().unwrap().to_string();

        assert!(login(state.clone(), auth, login_body("camareira", &password),
            TestRequest::default().to_http_request()).await.is_ok());
    }

    #[actix_rt::test]
    async fn test_last_owner_is_protected() {
        let state = test_state().await;
        let owner_id = seed_user(&state, "dono", UserRole::Owner).await;
        let other_owner = request_with(claims_for("someone-else", UserRole::Owner, vec![]));

        let demote = UpdateUserRequest { role: Some("ADMIN".to_string()), ..Default::default() };
        let err = update_user(state.clone(), web::Path::from(owner_id.clone()), web::Json(demote), other_owner)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err = delete_user(state.clone(), web::Path::from(owner_id.clone()),
            request_with(claims_for("someone-else", UserRole::Owner, vec![]))).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err = delete_user(state.clone(), web::Path::from(owner_id.clone()),
            request_with(claims_for(&owner_id, UserRole::Owner, vec![]))).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn test_deactivation_revokes_sessions() {
        let state = test_state().await;
        let user_id = seed_user(&state, "portaria", UserRole::User).await;
        let (sid, _) = create_session(&state.db_pool, &user_id, Duration::hours(1), None).await.unwrap();

        let request = UpdateUserRequest { is_active: Some(false), ..Default::default() };
        update_user(state.clone(), web::Path::from(user_id.clone()), web::Json(request), owner_request())
            .await
            .unwrap();

        assert!(!crate::auth::is_session_active(&state.db_pool, &sid, &user_id).await.unwrap());
    }

    #[actix_rt::test]
    async fn test_update_permissions_rejects_unknown_scope() {
        let state = test_state().await;
        let user_id = seed_user(&state, "financeiro", UserRole::User).await;

        let err = update_user_permissions(state.clone(), web::Path::from(user_id.clone()),
            web::Json(UpdatePermissionsRequest { permissions: vec!["laundry".to_string()] }), owner_request())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = update_user_permissions(state.clone(), web::Path::from(user_id),
            web::Json(UpdatePermissionsRequest { permissions: vec!["financial".to_string()] }), owner_request())
            .await
            .unwrap();
        assert_eq!(response_json(resp).await["data"]["permissions"], serde_json::json!(["financial"]));
    }
}
