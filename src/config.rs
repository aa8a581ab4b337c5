// src/config.rs - Configuration management
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use anyhow::{Context, Result};
use rand::{thread_rng, Rng, distributions::Alphanumeric};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub hotel: HotelConfig,
    pub finance: FinanceConfig,
    pub setup: SetupConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub keep_alive: u64,
    pub static_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiration_hours: i64,
    pub bcrypt_cost: u32,
    pub max_login_attempts: u32,
    pub lockout_duration_minutes: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub max_request_size: usize,
    pub require_https: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// Property-level settings that drive "today" boundaries.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HotelConfig {
    pub name: String,
    pub utc_offset_hours: i32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FinanceConfig {
    /// Flat tax percentage applied to gross revenue in the DRE.
    pub default_tax_rate: f64,
    pub currency: String,
}

/// Shared secret for the `/setup` diagnostic endpoints. `None` disables them.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SetupConfig {
    pub secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dummy_32_chars_for_tests_pousada!!".to_string(),
            token_expiration_hours: 12,
            bcrypt_cost: 10,
            max_login_attempts: 5,
            lockout_duration_minutes: 15,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: None,
            keep_alive: 30,
            static_dir: "static".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:pousada.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: 30,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
                "http://localhost:8080".to_string(),
                "http://127.0.0.1:8080".to_string(),
            ],
            max_request_size: 1024 * 1024,
            require_https: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for HotelConfig {
    fn default() -> Self {
        Self {
            name: "Pousada Dois Corações".to_string(),
            utc_offset_hours: -3,
        }
    }
}

impl HotelConfig {
    pub fn offset(&self) -> chrono::FixedOffset {
        use chrono::Offset;
        chrono::FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| chrono::Utc.fix())
    }

    /// Calendar date at the property for the given instant.
    pub fn local_date(&self, now: chrono::DateTime<chrono::Utc>) -> chrono::NaiveDate {
        now.with_timezone(&self.offset()).date_naive()
    }

    /// `[start, end)` in UTC of the local calendar day.
    pub fn day_bounds(&self, date: chrono::NaiveDate) -> (chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>) {
        let local_midnight = date.and_time(chrono::NaiveTime::MIN);
        let start = local_midnight - chrono::Duration::hours(self.utc_offset_hours as i64);
        let start = chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(start, chrono::Utc);
        (start, start + chrono::Duration::days(1))
    }
}

impl Default for FinanceConfig {
    fn default() -> Self {
        Self {
            default_tax_rate: 6.0,
            currency: "BRL".to_string(),
        }
    }
}

pub fn generate_secret(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn load_config() -> Result<Config> {
    load_env_file()?;

    let mut config = if let Ok(config_file) = env::var("CONFIG_FILE") {
        let config_str = fs::read_to_string(&config_file)
            .with_context(|| format!("Failed to read config file: {}", config_file))?;
        toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_file))?
    } else {
        Config::default()
    };

    override_with_env(&mut config);

    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn override_with_env(config: &mut Config) {
    if let Ok(host) = env::var("BIND_ADDRESS") {
        config.server.host = host;
    }
    if let Some(port) = parse_env::<u16>("POUSADA_PORT") {
        config.server.port = port;
    }
    if let Some(workers) = parse_env::<usize>("POUSADA_WORKERS") {
        config.server.workers = Some(workers);
    }
    if let Ok(dir) = env::var("STATIC_DIR") {
        config.server.static_dir = dir;
    }
    if let Ok(url) = env::var("DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(max_conn) = parse_env::<u32>("DATABASE_MAX_CONNECTIONS") {
        config.database.max_connections = max_conn;
    }
    if let Some(min_conn) = parse_env::<u32>("DATABASE_MIN_CONNECTIONS") {
        config.database.min_connections = min_conn;
    }
    if let Ok(jwt_secret) = env::var("JWT_SECRET") {
        config.auth.jwt_secret = jwt_secret;
    }
    if let Some(hours) = parse_env::<i64>("AUTH_TOKEN_EXPIRATION_HOURS") {
        config.auth.token_expiration_hours = hours;
    }
    if let Some(cost) = parse_env::<u32>("AUTH_BCRYPT_COST") {
        config.auth.bcrypt_cost = cost;
    }
    if let Ok(origins_str) = env::var("ALLOWED_ORIGINS") {
        config.security.allowed_origins = origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(level) = env::var("RUST_LOG") {
        config.logging.level = level;
    }
    if let Some(offset) = parse_env::<i32>("HOTEL_UTC_OFFSET_HOURS") {
        config.hotel.utc_offset_hours = offset;
    }
    if let Some(rate) = parse_env::<f64>("DEFAULT_TAX_RATE") {
        config.finance.default_tax_rate = rate;
    }
    if let Ok(secret) = env::var("SETUP_SECRET") {
        let secret = secret.trim().to_string();
        config.setup.secret = if secret.is_empty() { None } else { Some(secret) };
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 32 {
            anyhow::bail!(
                "JWT_SECRET must be at least 32 characters long (current: {})",
                self.auth.jwt_secret.len()
            );
        }

        if self.database.max_connections < self.database.min_connections {
            anyhow::bail!(
                "max_connections ({}) must be >= min_connections ({})",
                self.database.max_connections,
                self.database.min_connections
            );
        }

        if !(0.0..=100.0).contains(&self.finance.default_tax_rate) {
            anyhow::bail!(
                "default_tax_rate must be between 0 and 100 (current: {})",
                self.finance.default_tax_rate
            );
        }

        if !(-12..=14).contains(&self.hotel.utc_offset_hours) {
            anyhow::bail!("utc_offset_hours must be between -12 and 14");
        }

        if let Some(ref secret) = self.setup.secret {
            if secret.len() < 16 {
                anyhow::bail!("SETUP_SECRET must be at least 16 characters long");
            }
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        env::var("POUSADA_ENV").map(|v| v == "production").unwrap_or(false)
    }

    pub fn print_startup_info(&self) {
        log::info!("Starting {}", self.hotel.name);
        log::info!("Server: {}:{}", self.server.host, self.server.port);
        log::info!("Database: {}", self.database.url);
        log::info!("Auth: JWT sessions ({}h expiration)", self.auth.token_expiration_hours);
        log::info!("Finance: default tax rate {}% ({})", self.finance.default_tax_rate, self.finance.currency);
        log::info!(
            "Setup endpoints: {}",
            if self.setup.secret.is_some() { "enabled" } else { "disabled" }
        );

        if !self.is_production() {
            log::warn!("Running in development mode");
        }
    }
}

pub fn load_env_file() -> Result<()> {
    if let Ok(env_file) = env::var("ENV_FILE") {
        dotenvy::from_filename(&env_file)
            .with_context(|| format!("Failed to load environment file: {}", env_file))?;
    } else if Path::new(".env").exists() {
        dotenvy::dotenv().context("Failed to load .env file")?;
    }
    Ok(())
}
