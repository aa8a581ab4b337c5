// src/models/pool.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

pub const PH_RANGE: (f64, f64) = (7.2, 7.8);
/// Free chlorine, ppm.
pub const CHLORINE_RANGE: (f64, f64) = (1.0, 3.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, IntoStaticStr, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum PoolStatus {
    Open,
    Closed,
    Maintenance,
}

impl PoolStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }
}

impl Default for PoolStatus {
    fn default() -> Self {
        PoolStatus::Open
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub volume_liters: Option<f64>,
    pub status: String,
    pub ph: Option<f64>,
    pub chlorine: Option<f64>,
    pub temperature: Option<f64>,
    pub last_treatment_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreatePoolRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: String,
    #[validate(range(min = 0.0, message = "Volume cannot be negative"))]
    pub volume_liters: Option<f64>,
    pub status: Option<String>,
    #[validate(length(max = 2000, message = "Notes cannot exceed 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone, Default)]
pub struct UpdatePoolRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: Option<String>,
    #[validate(range(min = 0.0, message = "Volume cannot be negative"))]
    pub volume_liters: Option<f64>,
    pub status: Option<String>,
    #[validate(length(max = 2000, message = "Notes cannot exceed 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct PoolReadingRequest {
    #[validate(range(min = 0.0, max = 14.0, message = "pH must be between 0 and 14"))]
    pub ph: Option<f64>,
    #[validate(range(min = 0.0, max = 20.0, message = "Chlorine must be between 0 and 20 ppm"))]
    pub chlorine: Option<f64>,
    #[validate(range(min = -10.0, max = 60.0, message = "Temperature must be between -10 and 60 °C"))]
    pub temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PoolReadingResponse {
    pub pool: Pool,
    pub warnings: Vec<String>,
}

/// Out-of-range messages for a water reading; empty when everything is within range.
pub fn reading_warnings(ph: Option<f64>, chlorine: Option<f64>) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some(ph) = ph {
        if ph < PH_RANGE.0 || ph > PH_RANGE.1 {
            warnings.push(format!(
                "pH {:.1} outside recommended range {:.1}-{:.1}",
                ph, PH_RANGE.0, PH_RANGE.1
            ));
        }
    }

    if let Some(chlorine) = chlorine {
        if chlorine < CHLORINE_RANGE.0 || chlorine > CHLORINE_RANGE.1 {
            warnings.push(format!(
                "Free chlorine {:.1} ppm outside recommended range {:.0}-{:.0} ppm",
                chlorine, CHLORINE_RANGE.0, CHLORINE_RANGE.1
            ));
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_warnings_in_range() {
        assert!(reading_warnings(Some(7.4), Some(2.0)).is_empty());
        assert!(reading_warnings(Some(7.2), Some(1.0)).is_empty());
        assert!(reading_warnings(None, None).is_empty());
    }

    #[test]
    fn test_reading_warnings_out_of_range() {
        let warnings = reading_warnings(Some(8.1), Some(0.4));
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("pH"));
        assert!(warnings[1].contains("chlorine"));
    }
}
