// src/audit.rs - Audit trail for mutating operations

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{require_manager, Claims};
use crate::error::ApiResult;
use crate::handlers::{ApiResponse, PaginatedResponse, PaginationQuery};
use crate::AppState;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: String,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub description: Option<String>,
    pub changes: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Collects field-level differences for the `changes` column.
#[derive(Debug, Default)]
pub struct ChangeSet {
    changes: Vec<FieldChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the field only when the value actually changes.
    pub fn add<T: ToString + PartialEq>(&mut self, field: &str, old: &T, new: &T) {
        if old != new {
            self.changes.push(FieldChange {
                field: field.to_string(),
                old: Some(old.to_string()),
                new: Some(new.to_string()),
            });
        }
    }

    pub fn add_opt<T: ToString + PartialEq>(&mut self, field: &str, old: &Option<T>, new: &Option<T>) {
        if old != new {
            self.changes.push(FieldChange {
                field: field.to_string(),
                old: old.as_ref().map(|v| v.to_string()),
                new: new.as_ref().map(|v| v.to_string()),
            });
        }
    }

    pub fn created(&mut self, field: &str, value: &str) {
        self.changes.push(FieldChange {
            field: field.to_string(),
            old: None,
            new: Some(value.to_string()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn to_description(&self) -> String {
        self.changes
            .iter()
            .map(|c| format!(
                "{}: {} → {}",
                c.field,
                c.old.as_deref().unwrap_or("∅"),
                c.new.as_deref().unwrap_or("∅")
            ))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn to_json(&self) -> Option<String> {
        if self.changes.is_empty() {
            None
        } else {
            serde_json::to_string(&self.changes).ok()
        }
    }
}

/// Write an event to audit_logs
pub async fn log_activity(
    pool: &SqlitePool,
    user_id: Option<&str>,
    action: &str,
    entity_type: &str,
    entity_id: Option<&str>,
    description: Option<&str>,
    changes: Option<&str>,
    request: Option<&HttpRequest>,
) -> Result<(), sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let ip_address = request.and_then(|req| {
        req.connection_info()
            .realip_remote_addr()
            .map(|s| s.to_string())
    });

    let user_agent = request.and_then(|req| {
        req.headers()
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    });

    sqlx::query(
        r#"INSERT INTO audit_logs
           (id, user_id, action, entity_type, entity_id, description, changes, ip_address, user_agent, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
    .bind(&id)
    .bind(user_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(description)
    .bind(changes)
    .bind(&ip_address)
    .bind(&user_agent)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Short form for the common case. Failures are logged, never returned.
pub async fn audit(
    pool: &SqlitePool,
    claims: &Claims,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    description: &str,
    request: &HttpRequest,
) {
    if let Err(e) = log_activity(
        pool,
        Some(&claims.sub),
        action,
        entity_type,
        Some(entity_id),
        Some(description),
        None,
        Some(request),
    ).await {
        log::error!("Failed to write audit log: {}", e);
    }
}

pub async fn audit_with_changes(
    pool: &SqlitePool,
    claims: &Claims,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    description: &str,
    changes: &ChangeSet,
    request: &HttpRequest,
) {
    let json = changes.to_json();
    if let Err(e) = log_activity(
        pool,
        Some(&claims.sub),
        action,
        entity_type,
        Some(entity_id),
        Some(description),
        json.as_deref(),
        Some(request),
    ).await {
        log::error!("Failed to write audit log: {}", e);
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct AuditQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub user_id: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub async fn get_audit_logs(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<AuditQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_manager(&http_request)?;

    let (page, per_page, offset) = PaginationQuery::from_parts(query.page, query.per_page).normalize();

    let mut conditions = vec!["1=1".to_string()];
    let mut params: Vec<String> = Vec::new();
    if let Some(ref entity_type) = query.entity_type {
        conditions.push("a.entity_type = ?".to_string());
        params.push(entity_type.clone());
    }
    if let Some(ref entity_id) = query.entity_id {
        conditions.push("a.entity_id = ?".to_string());
        params.push(entity_id.clone());
    }
    if let Some(ref user_id) = query.user_id {
        conditions.push("a.user_id = ?".to_string());
        params.push(user_id.clone());
    }
    let where_clause = conditions.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM audit_logs a WHERE {}", where_clause);
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    for p in &params {
        count_query = count_query.bind(p);
    }
    let total = count_query.fetch_one(&app_state.db_pool).await?.0;

    let sql = format!(
        r#"SELECT a.id, a.user_id, u.username, a.action, a.entity_type, a.entity_id, a.description,
                  a.changes, a.ip_address, a.user_agent, a.created_at
           FROM audit_logs a LEFT JOIN users u ON u.id = a.user_id
           WHERE {}
           ORDER BY a.created_at DESC LIMIT ? OFFSET ?"#,
        where_clause
    );
    let mut data_query = sqlx::query_as::<_, AuditLog>(&sql);
    for p in &params {
        data_query = data_query.bind(p);
    }
    let logs = data_query
        .bind(per_page)
        .bind(offset)
        .fetch_all(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse::new(logs, total, page, per_page))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_set_skips_unchanged_fields() {
        let mut cs = ChangeSet::new();
        cs.add("daily_rate", &250.0, &250.0);
        assert!(cs.is_empty());
        assert!(cs.to_json().is_none());

        cs.add("daily_rate", &250.0, &300.0);
        cs.add_opt("notes", &None, &Some("vista mar".to_string()));
        assert_eq!(cs.to_description(), "daily_rate: 250 → 300; notes: ∅ → vista mar");

        let json = cs.to_json().unwrap();
        assert!(json.contains("\"field\":\"daily_rate\""));
    }

    #[test]
    fn test_change_set_created() {
        let mut cs = ChangeSet::new();
        cs.created("number", "101");
        assert_eq!(cs.to_description(), "number: ∅ → 101");
    }
}
