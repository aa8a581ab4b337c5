// src/main.rs - Pousada Dois Corações admin backend
use actix_web::{
    middleware::{Compress, DefaultHeaders, Logger},
    web, App, HttpServer, Result,
};
use actix_web::http::header;
use actix_web_httpauth::middleware::HttpAuthentication;
use actix_cors::Cors;
use actix_files::NamedFile;
use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod audit;
mod auth;
mod auth_handlers;
mod booking_handlers;
mod config;
mod db;
mod dre;
mod error;
mod financial_handlers;
mod guest_handlers;
mod handlers;
mod maintenance_handlers;
mod models;
mod monitoring;
mod occupancy;
mod pool_handlers;
mod public_handlers;
mod quote_handlers;
mod room_handlers;
mod settings_handlers;
mod setup_handlers;
mod stock_handlers;
mod team_handlers;
mod validation;

#[cfg(test)]
mod test_utils;

use auth::{jwt_middleware, AuthService};
use config::{load_config, Config};
use monitoring::{Metrics, RequestLogger};

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
}

// ==================== MAIN ====================

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    setup_logging(&config)?;

    if config.is_production() {
        validate_production_config(&config)?;
    }
    config.print_startup_info();

    let pool = create_database_pool(&config.database).await?;
    db::run_migrations(&pool).await.context("Database migrations failed")?;

    let auth_service = Arc::new(AuthService::new(&config.auth));

    let owner_password = env::var("DEFAULT_OWNER_PASSWORD").ok();
    let created = setup_handlers::ensure_owner_account(&pool, &auth_service, owner_password.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create default owner account: {}", e))?;
    if let Some(owner) = created {
        log::warn!("Default owner account created:");
        log::warn!("  Username: {}", owner.username);
        if owner_password.is_none() {
            log::warn!("  Password: {} (generated, change it after the first login)", owner.password);
        }
    }

    let app_state = Arc::new(AppState {
        db_pool: pool.clone(),
        config: config.clone(),
    });

    monitoring::start_maintenance_tasks(pool.clone()).await;

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    let metrics = Arc::new(Metrics::new());
    let workers = config.server.workers;
    let keep_alive = config.server.keep_alive;

    let mut server = HttpServer::new(move || {
        let cors = setup_cors(&config);
        let auth_middleware = HttpAuthentication::bearer(jwt_middleware);
        let security_headers = setup_security_headers(&config.security);

        App::new()
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Logger::default())
            .wrap(Compress::default())
            .wrap(RequestLogger::new(metrics.clone()))
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(metrics.clone()))
            .app_data(web::JsonConfig::default().limit(config.security.max_request_size))

            // Health check and metrics (no auth)
            .service(
                web::scope("/health")
                    .route("", web::get().to(monitoring::health_check))
                    .route("/ready", web::get().to(monitoring::readiness_check))
                    .route("/metrics", web::get().to(monitoring::metrics_endpoint))
            )

            .service(
                web::scope("/auth")
                    .route("/login", web::post().to(auth_handlers::login))
            )

            // Website (no auth)
            .service(
                web::scope("/api/public")
                    .route("/rooms", web::get().to(public_handlers::get_public_rooms))
                    .route("/availability", web::get().to(public_handlers::get_public_availability))
                    .route("/quotes", web::post().to(public_handlers::create_public_quote))
                    .route("/reservations", web::post().to(public_handlers::create_public_reservation))
            )

            // Guarded by the setup secret
            .service(
                web::scope("/setup")
                    .route("/diagnose", web::get().to(setup_handlers::diagnose))
                    .route("/seed", web::post().to(setup_handlers::seed))
            )

            .service(
                web::scope("/api/v1")
                    .wrap(auth_middleware)
                    .configure(configure_api)
            )

            .route("/", web::get().to(serve_index))
    });

    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    server
        .keep_alive(Duration::from_secs(keep_alive))
        .bind(&bind_address)?
        .run()
        .await
        .context("Server failed to run")?;

    Ok(())
}

/// Authenticated API under `/api/v1`.
fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg
        .service(
            web::scope("/auth")
                .route("/logout", web::post().to(auth_handlers::logout))
                .route("/profile", web::get().to(auth_handlers::get_profile))
                .route("/change-password", web::post().to(auth_handlers::change_password))
                .route("/scopes", web::get().to(auth_handlers::get_scopes))
        )
        .service(
            web::scope("/users")
                .route("", web::get().to(auth_handlers::get_users))
                .route("", web::post().to(auth_handlers::create_user))
                .route("/{id}", web::get().to(auth_handlers::get_user))
                .route("/{id}", web::put().to(auth_handlers::update_user))
                .route("/{id}", web::delete().to(auth_handlers::delete_user))
                .route("/{id}/permissions", web::put().to(auth_handlers::update_user_permissions))
                .route("/{id}/reset-password", web::put().to(auth_handlers::reset_user_password))
        )
        .route("/audit", web::get().to(audit::get_audit_logs))
        .service(
            web::scope("/dashboard")
                .route("/stats", web::get().to(handlers::get_dashboard_stats))
        )
        .service(
            web::scope("/rooms")
                .route("", web::get().to(room_handlers::get_all_rooms))
                .route("", web::post().to(room_handlers::create_room))
                .route("/status-counts", web::get().to(room_handlers::get_room_status_counts))
                .route("/availability", web::get().to(room_handlers::get_available_rooms))
                .route("/{id}", web::get().to(room_handlers::get_room))
                .route("/{id}", web::put().to(room_handlers::update_room))
                .route("/{id}", web::delete().to(room_handlers::delete_room))
                .route("/{id}/status", web::put().to(room_handlers::update_room_status))
        )
        .service(
            web::scope("/bookings")
                .route("", web::get().to(booking_handlers::get_bookings))
                .route("", web::post().to(booking_handlers::create_booking))
                .route("/today", web::get().to(booking_handlers::get_today_bookings))
                .route("/{id}", web::get().to(booking_handlers::get_booking))
                .route("/{id}", web::put().to(booking_handlers::update_booking))
                .route("/{id}", web::delete().to(booking_handlers::delete_booking))
                .route("/{id}/confirm", web::post().to(booking_handlers::confirm_booking))
                .route("/{id}/check-in", web::post().to(booking_handlers::check_in_booking))
                .route("/{id}/check-out", web::post().to(booking_handlers::check_out_booking))
                .route("/{id}/cancel", web::post().to(booking_handlers::cancel_booking))
                .route("/{id}/no-show", web::post().to(booking_handlers::no_show_booking))
                .route("/{id}/payments", web::post().to(booking_handlers::register_payment))
        )
        .service(
            web::scope("/guests")
                .route("", web::get().to(guest_handlers::get_guests))
                .route("", web::post().to(guest_handlers::create_guest))
                .route("/{id}", web::get().to(guest_handlers::get_guest))
                .route("/{id}", web::put().to(guest_handlers::update_guest))
                .route("/{id}", web::delete().to(guest_handlers::delete_guest))
                .route("/{id}/bookings", web::get().to(guest_handlers::get_guest_bookings))
        )
        .service(
            web::scope("/quotes")
                .route("", web::get().to(quote_handlers::get_quotes))
                .route("", web::post().to(quote_handlers::create_quote))
                .route("/{id}", web::get().to(quote_handlers::get_quote))
                .route("/{id}", web::put().to(quote_handlers::update_quote))
                .route("/{id}", web::delete().to(quote_handlers::delete_quote))
                .route("/{id}/convert", web::post().to(quote_handlers::convert_quote))
        )
        .service(
            web::scope("/financial")
                .route("/expense-categories", web::get().to(financial_handlers::get_expense_categories))
                .route("/expense-categories", web::post().to(financial_handlers::create_expense_category))
                .route("/expense-categories/{id}", web::put().to(financial_handlers::update_expense_category))
                .route("/expense-categories/{id}", web::delete().to(financial_handlers::delete_expense_category))
                .route("/expenses", web::get().to(financial_handlers::get_expenses))
                .route("/expenses", web::post().to(financial_handlers::create_expense))
                .route("/expenses/export", web::get().to(financial_handlers::export_expenses))
                .route("/expenses/{id}", web::get().to(financial_handlers::get_expense))
                .route("/expenses/{id}", web::put().to(financial_handlers::update_expense))
                .route("/expenses/{id}", web::delete().to(financial_handlers::delete_expense))
                .route("/revenues", web::get().to(financial_handlers::get_revenues))
                .route("/revenues", web::post().to(financial_handlers::create_revenue))
                .route("/revenues/{id}", web::get().to(financial_handlers::get_revenue))
                .route("/revenues/{id}", web::put().to(financial_handlers::update_revenue))
                .route("/revenues/{id}", web::delete().to(financial_handlers::delete_revenue))
                .route("/transactions", web::get().to(financial_handlers::get_transactions))
                .route("/summary", web::get().to(financial_handlers::get_financial_summary))
                .route("/dre", web::get().to(financial_handlers::get_dre))
                .route("/dre/export", web::get().to(financial_handlers::export_dre))
        )
        .service(
            web::scope("/stock")
                .route("/categories", web::get().to(stock_handlers::get_stock_categories))
                .route("/categories", web::post().to(stock_handlers::create_stock_category))
                .route("/categories/{id}", web::put().to(stock_handlers::update_stock_category))
                .route("/categories/{id}", web::delete().to(stock_handlers::delete_stock_category))
                .route("/items", web::get().to(stock_handlers::get_stock_items))
                .route("/items", web::post().to(stock_handlers::create_stock_item))
                .route("/items/low-stock", web::get().to(stock_handlers::get_low_stock_items))
                .route("/items/{id}", web::get().to(stock_handlers::get_stock_item))
                .route("/items/{id}", web::put().to(stock_handlers::update_stock_item))
                .route("/items/{id}", web::delete().to(stock_handlers::delete_stock_item))
                .route("/items/{id}/adjust", web::post().to(stock_handlers::adjust_stock))
                .route("/items/{id}/movements", web::get().to(stock_handlers::get_stock_movements))
                .route("/purchases", web::get().to(stock_handlers::get_stock_purchases))
                .route("/purchases", web::post().to(stock_handlers::create_stock_purchase))
        )
        .service(
            web::scope("/maintenance")
                .route("", web::get().to(maintenance_handlers::get_maintenance_orders))
                .route("", web::post().to(maintenance_handlers::create_maintenance))
                .route("/{id}", web::get().to(maintenance_handlers::get_maintenance))
                .route("/{id}", web::put().to(maintenance_handlers::update_maintenance))
                .route("/{id}", web::delete().to(maintenance_handlers::delete_maintenance))
                .route("/{id}/start", web::post().to(maintenance_handlers::start_maintenance))
                .route("/{id}/complete", web::post().to(maintenance_handlers::complete_maintenance))
                .route("/{id}/cancel", web::post().to(maintenance_handlers::cancel_maintenance))
        )
        .service(
            web::scope("/team")
                .route("/staff", web::get().to(team_handlers::get_staff))
                .route("/staff", web::post().to(team_handlers::create_staff))
                .route("/staff/{id}", web::get().to(team_handlers::get_staff_member))
                .route("/staff/{id}", web::put().to(team_handlers::update_staff))
                .route("/staff/{id}", web::delete().to(team_handlers::delete_staff))
                .route("/shifts", web::get().to(team_handlers::get_shifts))
                .route("/shifts", web::post().to(team_handlers::create_shift))
                .route("/shifts/{id}", web::get().to(team_handlers::get_shift))
                .route("/shifts/{id}", web::put().to(team_handlers::update_shift))
                .route("/shifts/{id}", web::delete().to(team_handlers::delete_shift))
                .route("/tasks", web::get().to(team_handlers::get_tasks))
                .route("/tasks", web::post().to(team_handlers::create_task))
                .route("/tasks/{id}", web::get().to(team_handlers::get_task))
                .route("/tasks/{id}", web::put().to(team_handlers::update_task))
                .route("/tasks/{id}", web::delete().to(team_handlers::delete_task))
                .route("/tasks/{id}/status", web::put().to(team_handlers::update_task_status))
        )
        .service(
            web::scope("/pools")
                .route("", web::get().to(pool_handlers::get_pools))
                .route("", web::post().to(pool_handlers::create_pool))
                .route("/{id}", web::get().to(pool_handlers::get_pool))
                .route("/{id}", web::put().to(pool_handlers::update_pool))
                .route("/{id}", web::delete().to(pool_handlers::delete_pool))
                .route("/{id}/readings", web::post().to(pool_handlers::record_pool_reading))
        )
        .service(
            web::scope("/settings")
                .route("/organization", web::get().to(settings_handlers::get_organization))
                .route("/organization", web::put().to(settings_handlers::update_organization))
        );
}

// ==================== HELPER FUNCTIONS ====================

fn setup_cors(config: &Config) -> Cors {
    let origins = &config.security.allowed_origins;
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .expose_headers(vec![header::CONTENT_LENGTH, header::CONTENT_DISPOSITION])
        .max_age(3600);

    if origins.iter().any(|o| o == "*") {
        // Rejected in production by validate_production_config
        log::warn!("Using wildcard CORS (*) in development mode");
        cors = cors.allow_any_origin();
    } else {
        for origin in origins.iter().filter(|o| !o.is_empty()) {
            cors = cors.allowed_origin(origin);
        }
    }

    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(())
}

fn validate_production_config(config: &Config) -> anyhow::Result<()> {
    if config.security.allowed_origins.iter().any(|o| o == "*") {
        anyhow::bail!("Wildcard CORS origins not allowed in production!");
    }
    if !config.security.require_https {
        log::warn!("Production mode without require_https: HSTS header disabled");
    }
    if env::var("JWT_SECRET").is_err() {
        anyhow::bail!("JWT_SECRET must be set explicitly in production");
    }
    Ok(())
}

async fn create_database_pool(db_config: &config::DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&db_config.url)
        .with_context(|| format!("Invalid DATABASE_URL: {}", db_config.url))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(Duration::from_secs(db_config.connect_timeout))
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_config.url))?;

    Ok(pool)
}

fn setup_security_headers(config: &config::SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("X-XSS-Protection", "1; mode=block"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains; preload"
        ));
    }

    headers
}

/// Public landing page.
async fn serve_index(app_state: web::Data<Arc<AppState>>) -> Result<NamedFile> {
    let path = PathBuf::from(&app_state.config.server.static_dir).join("index.html");
    Ok(NamedFile::open(path)?)
}
