// src/handlers.rs
use actix_web::{web, HttpResponse, HttpRequest};
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use crate::AppState;
use crate::error::ApiResult;
use crate::auth::get_current_user;
use crate::occupancy::{self, StatusCounts};

// ==================== COMMON STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: i64, per_page: i64) -> Self {
        let total_pages = if per_page > 0 { (total + per_page - 1) / per_page } else { 0 };
        Self {
            data,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PaginationQuery {
    pub fn from_parts(page: Option<i64>, per_page: Option<i64>) -> Self {
        Self { page, per_page }
    }

    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1).saturating_mul(per_page);
        (page, per_page, offset)
    }
}

// ==================== DASHBOARD STATISTICS ====================

#[derive(Debug, Serialize, Default, PartialEq)]
pub struct DashboardStats {
    pub rooms: StatusCounts,
    pub arrivals_today: i64,
    pub departures_today: i64,
    pub guests_in_house: i64,
    pub month_revenue: f64,
    pub month_expenses: f64,
    pub month_result: f64,
    pub low_stock_items: i64,
    pub open_maintenance: i64,
    pub pending_tasks: i64,
    pub open_quotes: i64,
}

pub fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = date.with_day(1).unwrap_or(date);
    let next_month = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    };
    let last = next_month.and_then(|d| d.pred_opt()).unwrap_or(date);
    (first, last)
}

pub async fn load_dashboard_stats(app_state: &AppState, now: DateTime<Utc>) -> ApiResult<DashboardStats> {
    let pool = &app_state.db_pool;
    let rooms = occupancy::status_counts(pool, now).await?;

    let today = app_state.config.hotel.local_date(now);
    let (day_start, day_end) = app_state.config.hotel.day_bounds(today);

    let arrivals: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM bookings WHERE status IN ('PRE_BOOKING', 'CONFIRMED') AND check_in >= ? AND check_in < ?"
    )
        .bind(day_start)
        .bind(day_end)
        .fetch_one(pool)
        .await?;

    let departures: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM bookings WHERE status = 'CHECKED_IN' AND check_out < ?"
    )
        .bind(day_end)
        .fetch_one(pool)
        .await?;

    let in_house: (i64,) = sqlx::query_as(
        "SELECT CAST(COALESCE(SUM(adults + children), 0) AS INTEGER) FROM bookings WHERE status = 'CHECKED_IN'"
    )
        .fetch_one(pool)
        .await?;

    let (month_start, month_end) = month_bounds(today);
    let revenue: (f64,) = sqlx::query_as(
        "SELECT CAST(COALESCE(SUM(amount), 0) AS REAL) FROM revenues WHERE revenue_date BETWEEN ? AND ?"
    )
        .bind(month_start)
        .bind(month_end)
        .fetch_one(pool)
        .await?;

    let expenses: (f64,) = sqlx::query_as(
        "SELECT CAST(COALESCE(SUM(amount), 0) AS REAL) FROM expenses WHERE expense_date BETWEEN ? AND ?"
    )
        .bind(month_start)
        .bind(month_end)
        .fetch_one(pool)
        .await?;

    let low_stock: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stock_items WHERE current_stock < minimum_stock")
        .fetch_one(pool)
        .await?;

    let open_maintenance: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM room_maintenance WHERE status IN ('PENDING', 'IN_PROGRESS')"
    )
        .fetch_one(pool)
        .await?;

    let pending_tasks: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE status IN ('PENDING', 'IN_PROGRESS')")
        .fetch_one(pool)
        .await?;

    let open_quotes: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM quotes WHERE status IN ('PENDING', 'SENT')")
        .fetch_one(pool)
        .await?;

    let month_revenue = crate::models::round_cents(revenue.0);
    let month_expenses = crate::models::round_cents(expenses.0);

    Ok(DashboardStats {
        rooms,
        arrivals_today: arrivals.0,
        departures_today: departures.0,
        guests_in_house: in_house.0,
        month_revenue,
        month_expenses,
        month_result: crate::models::round_cents(month_revenue - month_expenses),
        low_stock_items: low_stock.0,
        open_maintenance: open_maintenance.0,
        pending_tasks: pending_tasks.0,
        open_quotes: open_quotes.0,
    })
}

/// Never fails: a broken aggregation yields zeroed stats and an error log.
pub async fn get_dashboard_stats(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;

    let stats = match load_dashboard_stats(&app_state, Utc::now()).await {
        Ok(stats) => stats,
        Err(e) => {
            log::error!("Failed to compute dashboard stats: {}", e);
            DashboardStats::default()
        }
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_pagination_normalize() {
        assert_eq!(PaginationQuery::default().normalize(), (1, 20, 0));
        assert_eq!(PaginationQuery::from_parts(Some(3), Some(10)).normalize(), (3, 10, 20));
        assert_eq!(PaginationQuery::from_parts(Some(0), Some(1000)).normalize(), (1, 100, 0));
        assert_eq!(PaginationQuery::from_parts(Some(i64::MAX), Some(20)).normalize(), (i64::MAX, 20, i64::MAX));
    }

    #[test]
    fn test_paginated_response_pages() {
        let page = PaginatedResponse::new(vec![1, 2], 41, 1, 20);
        assert_eq!(page.total_pages, 3);
        let empty: PaginatedResponse<i32> = PaginatedResponse::new(vec![], 0, 1, 20);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn test_month_bounds() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 15).unwrap();
        assert_eq!(month_bounds(d), (NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));
        let d = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        assert_eq!(month_bounds(d).1, d);
    }

    #[actix_rt::test]
    async fn test_dashboard_on_empty_database() {
        let state = test_state().await;
        let stats = load_dashboard_stats(&state, Utc::now()).await.unwrap();
        assert_eq!(stats, DashboardStats::default());
    }

    #[actix_rt::test]
    async fn test_dashboard_degrades_to_zeroed_stats() {
        let state = test_state().await;
        seed_room(&state, "101", 2, 200.0).await;
        sqlx::query("DROP TABLE pools").execute(&state.db_pool).await.unwrap();
        sqlx::query("DROP TABLE tasks").execute(&state.db_pool).await.unwrap();

        let resp = get_dashboard_stats(state.clone(), owner_request()).await.unwrap();
        let body = response_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["pending_tasks"], 0);
        assert_eq!(body["data"]["rooms"]["total"], 0);
    }
}
