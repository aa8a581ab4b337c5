use bcrypt::{hash, verify};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;
use actix_web::web;
use actix_web::HttpMessage;
use validator::Validate;
use actix_web::{HttpRequest, dev::ServiceRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use strum::{Display, EnumIter, EnumString, IntoStaticStr, IntoEnumIterator};
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

// ======== USER MODEL ========

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub password_hash: String,
    pub role: String,
    /// JSON array of scope names, only meaningful for `USER` accounts.
    pub permissions: String,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub failed_login_attempts: i64,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ======== USER ROLE ========

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, IntoStaticStr, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum UserRole {
    Owner,
    Admin,
    User,
}

impl UserRole {
    pub fn from_str(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }

    pub fn as_str(&self) -> &'static str {
        (*self).into()
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            UserRole::Owner => "Proprietário",
            UserRole::Admin => "Administrador",
            UserRole::User => "Colaborador",
        }
    }

    /// Owners and admins hold every scope.
    pub fn is_manager(&self) -> bool {
        matches!(self, UserRole::Owner | UserRole::Admin)
    }

    /// Owners manage everyone; admins only manage regular users.
    pub fn can_manage_role(&self, target: UserRole) -> bool {
        match self {
            UserRole::Owner => true,
            UserRole::Admin => target == UserRole::User,
            UserRole::User => false,
        }
    }
}

// ======== SCOPES ========

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display, IntoStaticStr, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Scope {
    Bookings,
    Guests,
    Rooms,
    Financial,
    Stock,
    Maintenance,
    Team,
    Pools,
    Settings,
    Users,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }

    pub fn description(self) -> &'static str {
        match self {
            Scope::Bookings => "Reservas, check-in e check-out",
            Scope::Guests => "Cadastro de hóspedes",
            Scope::Rooms => "Quartos e status",
            Scope::Financial => "Despesas, receitas e DRE",
            Scope::Stock => "Estoque e compras",
            Scope::Maintenance => "Manutenção de quartos",
            Scope::Team => "Equipe, escalas e tarefas",
            Scope::Pools => "Piscinas",
            Scope::Settings => "Configurações da pousada",
            Scope::Users => "Usuários e permissões",
        }
    }
}

/// Parses a stored permission list, ignoring unknown entries.
pub fn parse_permissions(raw: &str) -> Vec<Scope> {
    let names: Vec<String> = serde_json::from_str(raw).unwrap_or_default();
    let mut scopes: Vec<Scope> = names.iter().filter_map(|n| Scope::parse(n)).collect();
    scopes.sort_by_key(|s| s.as_str());
    scopes.dedup();
    scopes
}

pub fn permissions_to_json(scopes: &[Scope]) -> String {
    let mut names: Vec<&'static str> = scopes.iter().map(|s| s.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string())
}

/// Scopes a role actually holds given its explicit grants.
pub fn effective_scopes(role: UserRole, granted: &[Scope]) -> Vec<Scope> {
    if role.is_manager() {
        Scope::iter().collect()
    } else {
        granted.to_vec()
    }
}

// ======== REQUEST/RESPONSE STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(length(min = 8, message = "New password must be at least 8 characters"))]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
    pub user: UserInfo,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role: UserRole,
    pub permissions: Vec<Scope>,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        let role = user.get_role();
        let permissions = effective_scopes(role, &parse_permissions(&user.permissions));
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            role,
            permissions,
            is_active: user.is_active,
            last_login: user.last_login,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub username: String,
    pub role: UserRole,
    pub permissions: Vec<Scope>,
    /// Server-side session id; logout revokes it.
    pub sid: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.role.is_manager() || self.permissions.contains(&scope)
    }
}

// ======== AUTH SERVICE ========

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            token_ttl: Duration::hours(config.token_expiration_hours),
            bcrypt_cost: config.bcrypt_cost,
        }
    }

    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    pub fn hash_password(&self, password: &str) -> ApiResult<String> {
        validate_password_strength(password)?;
        hash(password, self.bcrypt_cost)
            .map_err(|_| ApiError::InternalServerError("Failed to hash password".to_string()))
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> ApiResult<bool> {
        verify(password, hash)
            .map_err(|_| ApiError::InternalServerError("Password verification failed".to_string()))
    }

    pub fn generate_token(&self, user: &User, session_id: &str, expires_at: DateTime<Utc>) -> ApiResult<String> {
        let now = Utc::now();
        let role = user.get_role();

        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            role,
            permissions: effective_scopes(role, &parse_permissions(&user.permissions)),
            sid: session_id.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| ApiError::AuthError("Failed to generate token".to_string()))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        let validation = Validation::default();
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature =>
                        ApiError::AuthError("Token expired".to_string()),
                    jsonwebtoken::errors::ErrorKind::InvalidToken =>
                        ApiError::AuthError("Invalid token".to_string()),
                    _ =>
                        ApiError::AuthError("Token verification failed".to_string()),
                }
            })
    }
}

// ======== PASSWORD VALIDATION ========

pub fn validate_password_strength(password: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::ValidationError("Password must be at least 8 characters".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ApiError::ValidationError("Password must contain at least one uppercase letter".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(ApiError::ValidationError("Password must contain at least one lowercase letter".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(ApiError::ValidationError("Password must contain at least one digit".to_string()));
    }
    Ok(())
}

// ======== USER METHODS ========

impl User {
    pub async fn find_by_username(pool: &SqlitePool, username: &str) -> ApiResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::not_found("User"))
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> ApiResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::not_found("User"))
    }

    /// Inserts an account with an already hashed password.
    pub async fn insert(
        pool: &SqlitePool,
        username: &str,
        email: &str,
        full_name: Option<&str>,
        password_hash: &str,
        role: UserRole,
        permissions: &[Scope],
    ) -> ApiResult<User> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"INSERT INTO users (
                id, username, email, full_name, password_hash, role, permissions, is_active,
                failed_login_attempts, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?)"#
        )
            .bind(&id)
            .bind(username)
            .bind(email)
            .bind(full_name)
            .bind(password_hash)
            .bind(role.as_str())
            .bind(permissions_to_json(permissions))
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.message().contains("UNIQUE") => {
                    ApiError::conflict("Username or email already in use")
                }
                _ => ApiError::from(e),
            })?;

        User::find_by_id(pool, &id).await
    }

    pub async fn update_last_login(&self, pool: &SqlitePool) -> ApiResult<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_password(&self, pool: &SqlitePool, new_hash: &str) -> ApiResult<()> {
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(new_hash)
            .bind(Utc::now())
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn change_password(
        &self,
        pool: &SqlitePool,
        current_password: &str,
        new_password: &str,
        auth_service: &AuthService
    ) -> ApiResult<()> {
        if !auth_service.verify_password(current_password, &self.password_hash)? {
            return Err(ApiError::AuthError("Current password is incorrect".to_string()));
        }

        let new_hash = auth_service.hash_password(new_password)?;
        self.set_password(pool, &new_hash).await
    }

    // Methods for lock management
    pub fn is_locked(&self) -> bool {
        if let Some(locked_until) = self.locked_until {
            Utc::now() < locked_until
        } else {
            false
        }
    }

    pub async fn increment_failed_attempts(&mut self, pool: &SqlitePool) -> ApiResult<()> {
        self.failed_login_attempts += 1;
        sqlx::query("UPDATE users SET failed_login_attempts = ? WHERE id = ?")
            .bind(self.failed_login_attempts)
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn lock_for_duration(&mut self, pool: &SqlitePool, duration: Duration) -> ApiResult<()> {
        self.locked_until = Some(Utc::now() + duration);
        sqlx::query("UPDATE users SET locked_until = ? WHERE id = ?")
            .bind(self.locked_until)
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn reset_failed_attempts(&mut self, pool: &SqlitePool) -> ApiResult<()> {
        self.failed_login_attempts = 0;
        self.locked_until = None;
        sqlx::query(
            "UPDATE users SET failed_login_attempts = 0, locked_until = NULL WHERE id = ?"
        )
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub fn get_role(&self) -> UserRole {
        UserRole::from_str(&self.role).unwrap_or(UserRole::User)
    }
}

// ======== SESSIONS ========

pub async fn create_session(
    pool: &SqlitePool,
    user_id: &str,
    ttl: Duration,
    request: Option<&HttpRequest>,
) -> ApiResult<(String, DateTime<Utc>)> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let expires_at = now + ttl;

    let ip_address = request.and_then(|req| {
        req.connection_info().realip_remote_addr().map(|s| s.to_string())
    });
    let user_agent = request.and_then(|req| {
        req.headers()
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    });

    sqlx::query(
        "INSERT INTO sessions (id, user_id, created_at, expires_at, ip_address, user_agent) VALUES (?, ?, ?, ?, ?, ?)"
    )
        .bind(&id)
        .bind(user_id)
        .bind(now)
        .bind(expires_at)
        .bind(&ip_address)
        .bind(&user_agent)
        .execute(pool)
        .await?;

    Ok((id, expires_at))
}

/// A session is live when it exists, is not revoked or expired and its user is active.
pub async fn is_session_active(pool: &SqlitePool, session_id: &str, user_id: &str) -> ApiResult<bool> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT s.id FROM sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.id = ? AND s.user_id = ? AND s.revoked_at IS NULL AND s.expires_at > ? AND u.is_active = 1
        "#
    )
        .bind(session_id)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?;

    Ok(row.is_some())
}

pub async fn revoke_session(pool: &SqlitePool, session_id: &str) -> ApiResult<()> {
    sqlx::query("UPDATE sessions SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
        .bind(Utc::now())
        .bind(session_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Ends every live session of a user (password reset, deactivation, role change).
pub async fn revoke_user_sessions(pool: &SqlitePool, user_id: &str) -> ApiResult<u64> {
    let result = sqlx::query("UPDATE sessions SET revoked_at = ? WHERE user_id = ? AND revoked_at IS NULL")
        .bind(Utc::now())
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ======== HELPER FUNCTIONS ========

pub fn get_current_user(req: &HttpRequest) -> ApiResult<Claims> {
    req.extensions()
        .get::<Claims>().cloned()
        .ok_or_else(|| ApiError::Unauthorized("No user information found".to_string()))
}

pub fn check_permission<F>(claims: &Claims, check: F) -> ApiResult<()>
where
    F: Fn(&Claims) -> bool,
{
    if check(claims) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Insufficient permissions".to_string()))
    }
}

/// Current user, provided they hold `scope`.
pub fn require_scope(req: &HttpRequest, scope: Scope) -> ApiResult<Claims> {
    let claims = get_current_user(req)?;
    check_permission(&claims, |c| c.has_scope(scope))?;
    Ok(claims)
}

/// Current user, provided they are OWNER or ADMIN.
pub fn require_manager(req: &HttpRequest) -> ApiResult<Claims> {
    let claims = get_current_user(req)?;
    check_permission(&claims, |c| c.role.is_manager())?;
    Ok(claims)
}

// ======== JWT MIDDLEWARE ========

pub async fn jwt_middleware(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (actix_web::Error, ServiceRequest)> {
    let token = credentials.token();

    let auth_service = match req.app_data::<web::Data<Arc<AuthService>>>() {
        Some(svc) => svc.clone(),
        None => {
            log::error!("AuthService not found in app data");
            return Err((
                ApiError::InternalServerError("Auth service not available".to_string()).into(),
                req,
            ));
        }
    };

    let claims = match auth_service.verify_token(token) {
        Ok(claims) => claims,
        Err(err) => {
            log::warn!("JWT verification failed: {}", err);
            return Err((err.into(), req));
        }
    };

    let app_state = match req.app_data::<web::Data<Arc<AppState>>>() {
        Some(state) => state.clone(),
        None => {
            log::error!("AppState not found in app data");
            return Err((
                ApiError::InternalServerError("Application state not available".to_string()).into(),
                req,
            ));
        }
    };

    match is_session_active(&app_state.db_pool, &claims.sid, &claims.sub).await {
        Ok(true) => {
            req.extensions_mut().insert(claims);
            Ok(req)
        }
        Ok(false) => {
            log::warn!("Rejected token for ended session {} (user {})", claims.sid, claims.username);
            Err((ApiError::AuthError("Session expired or revoked".to_string()).into(), req))
        }
        Err(err) => Err((err.into(), req)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: UserRole, permissions: &[Scope]) -> User {
        let now = Utc::now();
        User {
            id: "u1".to_string(),
            username: "recepcao".to_string(),
            email: "recepcao@pousada.com.br".to_string(),
            full_name: None,
            password_hash: String::new(),
            role: role.as_str().to_string(),
            permissions: permissions_to_json(permissions),
            is_active: true,
            last_login: None,
            failed_login_attempts: 0,
            locked_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_role_parsing_and_hierarchy() {
        assert_eq!(UserRole::from_str("owner"), Some(UserRole::Owner));
        assert_eq!(UserRole::from_str("ADMIN"), Some(UserRole::Admin));
        assert_eq!(UserRole::from_str("viewer"), None);
        assert!(UserRole::Owner.can_manage_role(UserRole::Admin));
        assert!(UserRole::Admin.can_manage_role(UserRole::User));
        assert!(!UserRole::Admin.can_manage_role(UserRole::Owner));
        assert!(!UserRole::User.can_manage_role(UserRole::User));
    }

    #[test]
    fn test_permissions_json() {
        let json = permissions_to_json(&[Scope::Stock, Scope::Bookings, Scope::Stock]);
        assert_eq!(json, r#"["bookings","stock"]"#);
        assert_eq!(parse_permissions(&json), vec![Scope::Bookings, Scope::Stock]);
        assert_eq!(parse_permissions(r#"["bookings","nonsense"]"#), vec![Scope::Bookings]);
        assert!(parse_permissions("not json").is_empty());
    }

    #[test]
    fn test_token_round_trip_carries_session_and_scopes() {
        let service = AuthService::new(&AuthConfig::default());
        let u = user(UserRole::User, &[Scope::Bookings]);
        let expires = Utc::now() + Duration::hours(1);

        let token = service.generate_token(&u, "session-1", expires).unwrap();
        let claims = service.verify_token(&token).unwrap();

        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.sid, "session-1");
        assert!(claims.has_scope(Scope::Bookings));
        assert!(!claims.has_scope(Scope::Financial));
    }

    #[test]
    fn test_managers_hold_every_scope() {
        let service = AuthService::new(&AuthConfig::default());
        let token = service
            .generate_token(&user(UserRole::Admin, &[]), "s", Utc::now() + Duration::hours(1))
            .unwrap();
        let claims = service.verify_token(&token).unwrap();
        assert!(Scope::iter().all(|s| claims.has_scope(s)));
    }

    #[test]
    fn test_invalid_token_rejected() {
        let service = AuthService::new(&AuthConfig::default());
        assert!(service.verify_token("not.a.token").is_err());
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password_strength("Senha123").is_ok());
        assert!(validate_password_strength("senha123").is_err());
        assert!(validate_password_strength("SENHA123").is_err());
        assert!(validate_password_strength("Senha").is_err());
    }
}
