// src/dre.rs
//! DRE (Demonstração do Resultado do Exercício): income statement for a date range.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::{ApiError, ApiResult};
use crate::models::round_cents;

#[derive(Debug, Serialize, Clone, PartialEq, sqlx::FromRow)]
pub struct DreLine {
    pub label: String,
    pub amount: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct DreReport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub revenue_by_source: Vec<DreLine>,
    pub gross_revenue: f64,
    pub tax_rate: f64,
    pub taxes: f64,
    pub net_revenue: f64,
    pub expenses_by_category: Vec<DreLine>,
    pub total_expenses: f64,
    pub result: f64,
    /// Result over gross revenue, in percent. Zero when there is no revenue.
    pub margin: f64,
}

pub fn build_dre(
    start_date: NaiveDate,
    end_date: NaiveDate,
    revenue_by_source: Vec<DreLine>,
    expenses_by_category: Vec<DreLine>,
    tax_rate: f64,
) -> DreReport {
    let gross_revenue: f64 = revenue_by_source.iter().map(|l| l.amount).sum();
    let total_expenses: f64 = expenses_by_category.iter().map(|l| l.amount).sum();

    let taxes = gross_revenue * tax_rate / 100.0;
    let net_revenue = gross_revenue - taxes;
    let result = net_revenue - total_expenses;
    let margin = if gross_revenue == 0.0 {
        0.0
    } else {
        result / gross_revenue * 100.0
    };

    let rounded = |lines: Vec<DreLine>| -> Vec<DreLine> {
        lines
            .into_iter()
            .map(|l| DreLine { label: l.label, amount: round_cents(l.amount) })
            .collect()
    };

    DreReport {
        start_date,
        end_date,
        revenue_by_source: rounded(revenue_by_source),
        gross_revenue: round_cents(gross_revenue),
        tax_rate,
        taxes: round_cents(taxes),
        net_revenue: round_cents(net_revenue),
        expenses_by_category: rounded(expenses_by_category),
        total_expenses: round_cents(total_expenses),
        result: round_cents(result),
        margin: round_cents(margin),
    }
}

/// Tax rate precedence: explicit request value, organization setting, configured default.
pub fn resolve_tax_rate(requested: Option<f64>, organization: Option<f64>, default_rate: f64) -> ApiResult<f64> {
    let rate = requested.or(organization).unwrap_or(default_rate);
    if !rate.is_finite() || !(0.0..=100.0).contains(&rate) {
        return Err(ApiError::validation("Tax rate must be between 0 and 100"));
    }
    Ok(rate)
}

pub async fn load_dre(
    pool: &SqlitePool,
    start_date: NaiveDate,
    end_date: NaiveDate,
    tax_rate: f64,
) -> ApiResult<DreReport> {
    if end_date < start_date {
        return Err(ApiError::validation("end_date must not be before start_date"));
    }

    let revenue_by_source: Vec<DreLine> = sqlx::query_as(
        r#"
        SELECT source AS label, CAST(COALESCE(SUM(amount), 0) AS REAL) AS amount
        FROM revenues
        WHERE revenue_date BETWEEN ? AND ?
        GROUP BY source
        ORDER BY amount DESC, source ASC
        "#,
    )
    .bind(start_date)
    .bind(end_date)
    .fetch_all(pool)
    .await?;

    let expenses_by_category: Vec<DreLine> = sqlx::query_as(
        r#"
        SELECT c.name AS label, CAST(COALESCE(SUM(e.amount), 0) AS REAL) AS amount
        FROM expenses e
        JOIN expense_categories c ON c.id = e.category_id
        WHERE e.expense_date BETWEEN ? AND ?
        GROUP BY c.name
        ORDER BY amount DESC, c.name ASC
        "#,
    )
    .bind(start_date)
    .bind(end_date)
    .fetch_all(pool)
    .await?;

    Ok(build_dre(start_date, end_date, revenue_by_source, expenses_by_category, tax_rate))
}

/// Flat `section,label,amount` CSV for spreadsheet import.
pub fn dre_to_csv(report: &DreReport) -> ApiResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["section", "label", "amount"])?;

    let money = |v: f64| format!("{:.2}", v);

    for line in &report.revenue_by_source {
        writer.write_record(["revenue", line.label.as_str(), &money(line.amount)])?;
    }
    writer.write_record(["total", "gross_revenue", &money(report.gross_revenue)])?;
    writer.write_record(["total", "taxes", &money(report.taxes)])?;
    writer.write_record(["total", "net_revenue", &money(report.net_revenue)])?;
    for line in &report.expenses_by_category {
        writer.write_record(["expense", line.label.as_str(), &money(line.amount)])?;
    }
    writer.write_record(["total", "total_expenses", &money(report.total_expenses)])?;
    writer.write_record(["total", "result", &money(report.result)])?;
    writer.write_record(["total", "margin_percent", &money(report.margin)])?;

    writer
        .into_inner()
        .map_err(|e| ApiError::InternalServerError(format!("CSV export failed: {}", e)))
}
