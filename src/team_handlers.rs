// src/team_handlers.rs
//! Team: staff members, shift schedule and housekeeping/front-desk tasks

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;
use log::info;

use crate::AppState;
use crate::audit::{audit, audit_with_changes, ChangeSet};
use crate::auth::{require_scope, Scope};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::*;
use crate::validation::{clean_optional, normalize_email, validate_date_range, validate_phone};

// ==================== STAFF ====================

async fn fetch_staff(pool: &SqlitePool, id: &str) -> ApiResult<Staff> {
    sqlx::query_as::<_, Staff>("SELECT * FROM staff WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Staff member"))
}

pub async fn get_staff(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Team)?;
    let staff = sqlx::query_as::<_, Staff>("SELECT * FROM staff ORDER BY is_active DESC, name")
        .fetch_all(&app_state.db_pool)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(staff)))
}

pub async fn get_staff_member(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Team)?;
    let member = fetch_staff(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(member)))
}

pub async fn create_staff(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateStaffRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Team)?;
    body.validate()?;
    let phone = clean_optional(&body.phone);
    if let Some(ref p) = phone {
        validate_phone(p)?;
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO staff (id, name, role, phone, email, hired_on, is_active, notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?)
        "#
    )
    .bind(&id)
    .bind(body.name.trim())
    .bind(body.role.trim())
    .bind(&phone)
    .bind(body.email.as_deref().and_then(normalize_email))
    .bind(body.hired_on)
    .bind(clean_optional(&body.notes))
    .bind(now)
    .bind(now)
    .execute(&app_state.db_pool)
    .await?;

    audit(&app_state.db_pool, &claims, "create", "staff", &id,
        &format!("Added staff member '{}' ({})", body.name.trim(), body.role.trim()), &http_request).await;
    info!("👥 Staff member '{}' added", body.name.trim());

    let member = fetch_staff(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(member)))
}

pub async fn update_staff(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdateStaffRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Team)?;
    body.validate()?;
    let id = path.into_inner();
    let existing = fetch_staff(&app_state.db_pool, &id).await?;

    let name = body.name.as_deref().map(str::trim).map(str::to_string).unwrap_or_else(|| existing.name.clone());
    let role = body.role.as_deref().map(str::trim).map(str::to_string).unwrap_or_else(|| existing.role.clone());
    let phone = match clean_optional(&body.phone) {
        Some(p) => {
            validate_phone(&p)?;
            Some(p)
        }
        None => existing.phone.clone(),
    };
    let email = body.email.as_deref().and_then(normalize_email).or_else(|| existing.email.clone());
    let hired_on = body.hired_on.or(existing.hired_on);
    let is_active = body.is_active.unwrap_or(existing.is_active);
    let notes = clean_optional(&body.notes).or_else(|| existing.notes.clone());

    sqlx::query(
        r#"
        UPDATE staff
        SET name = ?, role = ?, phone = ?, email = ?, hired_on = ?, is_active = ?, notes = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(&name)
    .bind(&role)
    .bind(&phone)
    .bind(&email)
    .bind(hired_on)
    .bind(is_active)
    .bind(&notes)
    .bind(Utc::now())
    .bind(&id)
    .execute(&app_state.db_pool)
    .await?;

    let mut cs = ChangeSet::new();
    cs.add("name", &existing.name, &name);
    cs.add("role", &existing.role, &role);
    cs.add_opt("phone", &existing.phone, &phone);
    cs.add("is_active", &existing.is_active, &is_active);
    if !cs.is_empty() {
        audit_with_changes(&app_state.db_pool, &claims, "edit", "staff", &id,
            &format!("Staff member '{}' updated: {}", name, cs.to_description()), &cs, &http_request).await;
    }

    let member = fetch_staff(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(member)))
}

/// Shifts go with the staff member; assigned tasks become unassigned.
pub async fn delete_staff(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Team)?;
    let id = path.into_inner();
    let member = fetch_staff(&app_state.db_pool, &id).await?;

    let mut tx = app_state.db_pool.begin().await?;
    let shifts = sqlx::query("DELETE FROM shifts WHERE staff_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    let tasks = sqlx::query("UPDATE tasks SET staff_id = NULL, updated_at = ? WHERE staff_id = ?")
        .bind(Utc::now())
        .bind(&id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM staff WHERE id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&app_state.db_pool, &claims, "delete", "staff", &id,
        &format!("Removed staff member '{}' ({} shift(s) deleted, {} task(s) unassigned)", member.name, shifts, tasks),
        &http_request).await;
    info!("🗑️ Staff member '{}' removed", member.name);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Staff member deleted".to_string())))
}

// ==================== SHIFTS ====================

const SHIFT_SELECT: &str = r#"
    SELECT s.*, st.name AS staff_name
    FROM shifts s
    JOIN staff st ON st.id = s.staff_id
"#;

async fn fetch_shift(pool: &SqlitePool, id: &str) -> ApiResult<ShiftWithStaff> {
    let sql = format!("{} WHERE s.id = ?", SHIFT_SELECT);
    sqlx::query_as::<_, ShiftWithStaff>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Shift"))
}

/// Same half-open overlap rule as bookings: back-to-back shifts are fine.
async fn ensure_no_shift_overlap(
    pool: &SqlitePool,
    staff_id: &str,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    exclude_id: &str,
) -> ApiResult<()> {
    let overlapping: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM shifts WHERE staff_id = ? AND id != ? AND starts_at < ? AND ends_at > ? LIMIT 1"
    )
    .bind(staff_id)
    .bind(exclude_id)
    .bind(ends_at)
    .bind(starts_at)
    .fetch_optional(pool)
    .await?;

    if overlapping.is_some() {
        return Err(ApiError::conflict("Staff member already has a shift in this period"));
    }
    Ok(())
}

pub async fn get_shifts(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ShiftQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Team)?;
    if let (Some(from), Some(to)) = (query.from, query.to) {
        validate_date_range(from, to, "Period")?;
    }

    let sql = format!(
        r#"{}
        WHERE (?1 IS NULL OR s.staff_id = ?1)
          AND (?2 IS NULL OR s.ends_at > ?2)
          AND (?3 IS NULL OR s.starts_at < ?3)
        ORDER BY s.starts_at"#,
        SHIFT_SELECT
    );
    let shifts = sqlx::query_as::<_, ShiftWithStaff>(&sql)
        .bind(&query.staff_id)
        .bind(query.from)
        .bind(query.to)
        .fetch_all(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(shifts)))
}

pub async fn get_shift(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Team)?;
    let shift = fetch_shift(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(shift)))
}

pub async fn create_shift(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateShiftRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Team)?;
    body.validate()?;
    validate_date_range(body.starts_at, body.ends_at, "Shift")?;
    let member = fetch_staff(&app_state.db_pool, &body.staff_id).await?;
    if !member.is_active {
        return Err(ApiError::validation("Cannot schedule an inactive staff member"));
    }
    ensure_no_shift_overlap(&app_state.db_pool, &member.id, body.starts_at, body.ends_at, "").await?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO shifts (id, staff_id, starts_at, ends_at, role, notes, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&id)
    .bind(&member.id)
    .bind(body.starts_at)
    .bind(body.ends_at)
    .bind(clean_optional(&body.role))
    .bind(clean_optional(&body.notes))
    .bind(now)
    .bind(now)
    .execute(&app_state.db_pool)
    .await?;

    audit(&app_state.db_pool, &claims, "create", "shift", &id,
        &format!("Shift for '{}' on {}", member.name, body.starts_at.format("%d/%m/%Y %H:%M")), &http_request).await;

    let shift = fetch_shift(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(shift)))
}

pub async fn update_shift(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdateShiftRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Team)?;
    body.validate()?;
    let id = path.into_inner();
    let existing = fetch_shift(&app_state.db_pool, &id).await?;

    let starts_at = body.starts_at.unwrap_or(existing.shift.starts_at);
    let ends_at = body.ends_at.unwrap_or(existing.shift.ends_at);
    validate_date_range(starts_at, ends_at, "Shift")?;
    ensure_no_shift_overlap(&app_state.db_pool, &existing.shift.staff_id, starts_at, ends_at, &id).await?;
    let role = clean_optional(&body.role).or_else(|| existing.shift.role.clone());
    let notes = clean_optional(&body.notes).or_else(|| existing.shift.notes.clone());

    sqlx::query("UPDATE shifts SET starts_at = ?, ends_at = ?, role = ?, notes = ?, updated_at = ? WHERE id = ?")
        .bind(starts_at)
        .bind(ends_at)
        .bind(&role)
        .bind(&notes)
        .bind(Utc::now())
        .bind(&id)
        .execute(&app_state.db_pool)
        .await?;

    let mut cs = ChangeSet::new();
    cs.add("starts_at", &existing.shift.starts_at, &starts_at);
    cs.add("ends_at", &existing.shift.ends_at, &ends_at);
    cs.add_opt("role", &existing.shift.role, &role);
    if !cs.is_empty() {
        audit_with_changes(&app_state.db_pool, &claims, "edit", "shift", &id,
            &format!("Shift of '{}' updated: {}", existing.staff_name, cs.to_description()), &cs, &http_request).await;
    }

    let shift = fetch_shift(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(shift)))
}

pub async fn delete_shift(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Team)?;
    let id = path.into_inner();
    let shift = fetch_shift(&app_state.db_pool, &id).await?;

    sqlx::query("DELETE FROM shifts WHERE id = ?")
        .bind(&id)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "delete", "shift", &id,
        &format!("Deleted shift of '{}' on {}", shift.staff_name, shift.shift.starts_at.format("%d/%m/%Y %H:%M")),
        &http_request).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Shift deleted".to_string())))
}

// ==================== TASKS ====================

async fn fetch_task(pool: &SqlitePool, id: &str) -> ApiResult<Task> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Task"))
}

async fn check_task_refs(pool: &SqlitePool, staff_id: Option<&str>, room_id: Option<&str>) -> ApiResult<()> {
    if let Some(staff_id) = staff_id {
        fetch_staff(pool, staff_id).await?;
    }
    if let Some(room_id) = room_id {
        let room: Option<(String,)> = sqlx::query_as("SELECT id FROM rooms WHERE id = ?")
            .bind(room_id)
            .fetch_optional(pool)
            .await?;
        if room.is_none() {
            return Err(ApiError::not_found("Room"));
        }
    }
    Ok(())
}

pub async fn get_tasks(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<TaskQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Team)?;
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            TaskStatus::parse(raw)
                .ok_or_else(|| ApiError::ValidationError(format!("Invalid task status: '{}'", raw)))?
                .as_str(),
        ),
        None => None,
    };

    let tasks = sqlx::query_as::<_, Task>(
        r#"
        SELECT * FROM tasks
        WHERE (?1 IS NULL OR status = ?1)
          AND (?2 IS NULL OR staff_id = ?2)
        ORDER BY CASE status WHEN 'IN_PROGRESS' THEN 0 WHEN 'PENDING' THEN 1 ELSE 2 END,
                 due_at IS NULL, due_at, created_at DESC
        "#
    )
    .bind(status)
    .bind(&query.staff_id)
    .fetch_all(&app_state.db_pool)
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(tasks)))
}

pub async fn get_task(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_scope(&http_request, Scope::Team)?;
    let task = fetch_task(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(task)))
}

pub async fn create_task(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateTaskRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Team)?;
    body.validate()?;
    let priority = parse_or_default(body.priority.as_deref(), Priority::parse, "priority")?;
    let staff_id = clean_optional(&body.staff_id);
    let room_id = clean_optional(&body.room_id);
    check_task_refs(&app_state.db_pool, staff_id.as_deref(), room_id.as_deref()).await?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO tasks (id, title, description, staff_id, room_id, priority, status, due_at, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 'PENDING', ?, ?, ?, ?)
        "#
    )
    .bind(&id)
    .bind(body.title.trim())
    .bind(clean_optional(&body.description))
    .bind(&staff_id)
    .bind(&room_id)
    .bind(priority.as_str())
    .bind(body.due_at)
    .bind(&claims.sub)
    .bind(now)
    .bind(now)
    .execute(&app_state.db_pool)
    .await?;

    audit(&app_state.db_pool, &claims, "create", "task", &id,
        &format!("Task '{}' created", body.title.trim()), &http_request).await;

    let task = fetch_task(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(task)))
}

pub async fn update_task(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdateTaskRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Team)?;
    body.validate()?;
    let id = path.into_inner();
    let existing = fetch_task(&app_state.db_pool, &id).await?;

    let title = body.title.as_deref().map(str::trim).map(str::to_string).unwrap_or_else(|| existing.title.clone());
    let description = clean_optional(&body.description).or_else(|| existing.description.clone());
    let staff_id = clean_optional(&body.staff_id).or_else(|| existing.staff_id.clone());
    let room_id = clean_optional(&body.room_id).or_else(|| existing.room_id.clone());
    let priority = match body.priority.as_deref() {
        Some(raw) => parse_or_default(Some(raw), Priority::parse, "priority")?.as_str().to_string(),
        None => existing.priority.clone(),
    };
    let due_at = body.due_at.or(existing.due_at);
    check_task_refs(&app_state.db_pool, staff_id.as_deref(), room_id.as_deref()).await?;

    sqlx::query(
        r#"
        UPDATE tasks
        SET title = ?, description = ?, staff_id = ?, room_id = ?, priority = ?, due_at = ?, updated_at = ?
        WHERE id = ?
        "#
    )
    .bind(&title)
    .bind(&description)
    .bind(&staff_id)
    .bind(&room_id)
    .bind(&priority)
    .bind(due_at)
    .bind(Utc::now())
    .bind(&id)
    .execute(&app_state.db_pool)
    .await?;

    let mut cs = ChangeSet::new();
    cs.add("title", &existing.title, &title);
    cs.add_opt("staff_id", &existing.staff_id, &staff_id);
    cs.add_opt("room_id", &existing.room_id, &room_id);
    cs.add("priority", &existing.priority, &priority);
    if !cs.is_empty() {
        audit_with_changes(&app_state.db_pool, &claims, "edit", "task", &id,
            &format!("Task '{}' updated: {}", title, cs.to_description()), &cs, &http_request).await;
    }

    let task = fetch_task(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(task)))
}

/// DONE stamps `completed_at`; moving away from DONE clears it.
pub async fn update_task_status(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<UpdateTaskStatusRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Team)?;
    let id = path.into_inner();
    let existing = fetch_task(&app_state.db_pool, &id).await?;
    let status = TaskStatus::parse(&body.status).ok_or_else(|| {
        ApiError::ValidationError("Invalid status. Must be: PENDING, IN_PROGRESS, DONE or CANCELLED".to_string())
    })?;

    let now = Utc::now();
    let completed_at = match status {
        TaskStatus::Done => Some(existing.completed_at.unwrap_or(now)),
        _ => None,
    };

    sqlx::query("UPDATE tasks SET status = ?, completed_at = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(completed_at)
        .bind(now)
        .bind(&id)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "status", "task", &id,
        &format!("Task '{}': {} → {}", existing.title, existing.status, status), &http_request).await;

    let task = fetch_task(&app_state.db_pool, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(task)))
}

pub async fn delete_task(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_scope(&http_request, Scope::Team)?;
    let id = path.into_inner();
    let task = fetch_task(&app_state.db_pool, &id).await?;

    sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(&id)
        .execute(&app_state.db_pool)
        .await?;

    audit(&app_state.db_pool, &claims, "delete", "task", &id,
        &format!("Deleted task '{}'", task.title), &http_request).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message((), "Task deleted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;
    use chrono::Duration;

    async fn add_staff(state: &web::Data<Arc<AppState>>, name: &str) -> String {
        let body = CreateStaffRequest {
            name: name.to_string(),
            role: "Camareira".to_string(),
            phone: None,
            email: None,
            hired_on: None,
            notes: None,
        };
        let resp = create_staff(state.clone(), web::Json(body), owner_request()).await.unwrap();
        response_json(resp).await["data"]["id"].as_str().unwrap().to_string()
    }

    fn shift_body(staff_id: &str, starts_at: DateTime<Utc>, hours: i64) -> CreateShiftRequest {
        CreateShiftRequest {
            staff_id: staff_id.to_string(),
            starts_at,
            ends_at: starts_at + Duration::hours(hours),
            role: None,
            notes: None,
        }
    }

    #[actix_rt::test]
    async fn test_overlapping_shift_rejected() {
        let state = test_state().await;
        let maria = add_staff(&state, "Maria Aparecida").await;
        let joana = add_staff(&state, "Joana Silva").await;
        let start = now_secs() + Duration::days(1);

        create_shift(state.clone(), web::Json(shift_body(&maria, start, 8)), owner_request()).await.unwrap();

        let err = create_shift(state.clone(), web::Json(shift_body(&maria, start + Duration::hours(4), 8)), owner_request())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        // Back-to-back and other staff are fine
        assert!(create_shift(state.clone(), web::Json(shift_body(&maria, start + Duration::hours(8), 4)), owner_request()).await.is_ok());
        assert!(create_shift(state.clone(), web::Json(shift_body(&joana, start + Duration::hours(2), 8)), owner_request()).await.is_ok());

        let err = create_shift(state.clone(), web::Json(shift_body(&joana, start, 0)), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_rt::test]
    async fn test_deleting_staff_removes_shifts_and_unassigns_tasks() {
        let state = test_state().await;
        let staff = add_staff(&state, "Carlos Pereira").await;
        create_shift(state.clone(), web::Json(shift_body(&staff, now_secs(), 6)), owner_request()).await.unwrap();

        let task = CreateTaskRequest {
            title: "Limpar piscina".to_string(),
            description: None,
            staff_id: Some(staff.clone()),
            room_id: None,
            priority: None,
            due_at: None,
        };
        let resp = create_task(state.clone(), web::Json(task), owner_request()).await.unwrap();
        let task_id = response_json(resp).await["data"]["id"].as_str().unwrap().to_string();

        delete_staff(state.clone(), web::Path::from(staff), owner_request()).await.unwrap();

        let shifts: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM shifts").fetch_one(&state.db_pool).await.unwrap();
        assert_eq!(shifts.0, 0);
        let task = fetch_task(&state.db_pool, &task_id).await.unwrap();
        assert!(task.staff_id.is_none());
        assert_eq!(task.priority, "MEDIUM");
    }

    #[actix_rt::test]
    async fn test_task_done_stamps_completion() {
        let state = test_state().await;
        let task = CreateTaskRequest {
            title: "Repor frigobar 101".to_string(),
            description: None,
            staff_id: None,
            room_id: None,
            priority: Some("urgent".to_string()),
            due_at: None,
        };
        let resp = create_task(state.clone(), web::Json(task), owner_request()).await.unwrap();
        let id = response_json(resp).await["data"]["id"].as_str().unwrap().to_string();

        let done = UpdateTaskStatusRequest { status: "done".to_string() };
        let body = response_json(update_task_status(state.clone(), web::Path::from(id.clone()), web::Json(done), owner_request()).await.unwrap()).await;
        assert_eq!(body["data"]["status"], "DONE");
        assert!(body["data"]["completed_at"].is_string());

        let reopen = UpdateTaskStatusRequest { status: "PENDING".to_string() };
        let body = response_json(update_task_status(state.clone(), web::Path::from(id.clone()), web::Json(reopen), owner_request()).await.unwrap()).await;
        assert!(body["data"]["completed_at"].is_null());

        let bad = UpdateTaskStatusRequest { status: "LATER".to_string() };
        let err = update_task_status(state.clone(), web::Path::from(id), web::Json(bad), owner_request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_rt::test]
    async fn test_team_requires_scope() {
        let state = test_state().await;
        let err = get_staff(state.clone(), staff_request(vec![Scope::Pools])).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(get_staff(state.clone(), staff_request(vec![Scope::Team])).await.is_ok());
    }
}
