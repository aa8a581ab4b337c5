// src/db.rs - Database migrations and setup

use chrono::Utc;
use sqlx::SqlitePool;
use anyhow::Result;

use crate::models::DEFAULT_ORGANIZATION_ID;

/// Tables reported by `/setup/diagnose`, in creation order.
pub const TABLES: &[&str] = &[
    "users",
    "sessions",
    "audit_logs",
    "organizations",
    "rooms",
    "guests",
    "bookings",
    "quotes",
    "expense_categories",
    "expenses",
    "revenues",
    "transactions",
    "stock_categories",
    "stock_items",
    "stock_purchases",
    "stock_movements",
    "room_maintenance",
    "staff",
    "shifts",
    "tasks",
    "pools",
];

#[tracing::instrument(skip_all)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys and WAL mode
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    // ==================== AUTH ====================

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE COLLATE NOCASE CHECK(length(username) >= 3 AND length(username) <= 50),
            email TEXT NOT NULL UNIQUE COLLATE NOCASE CHECK(length(email) >= 5 AND length(email) <= 255),
            full_name TEXT CHECK(full_name IS NULL OR length(full_name) <= 255),
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'USER' CHECK(role IN ('OWNER', 'ADMIN', 'USER')),
            permissions TEXT NOT NULL DEFAULT '[]',
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            last_login DATETIME,
            failed_login_attempts INTEGER NOT NULL DEFAULT 0,
            locked_until DATETIME,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            expires_at DATETIME NOT NULL,
            revoked_at DATETIME,
            ip_address TEXT,
            user_agent TEXT,
            FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT,
            description TEXT,
            changes TEXT,
            ip_address TEXT,
            user_agent TEXT,
            created_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // ==================== SETTINGS ====================

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS organizations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            legal_name TEXT,
            document TEXT,
            email TEXT,
            phone TEXT,
            address TEXT,
            city TEXT,
            state TEXT,
            tax_rate REAL CHECK(tax_rate IS NULL OR (tax_rate >= 0 AND tax_rate <= 100)),
            check_in_time TEXT NOT NULL DEFAULT '14:00',
            check_out_time TEXT NOT NULL DEFAULT '12:00',
            updated_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // ==================== ROOMS / GUESTS / BOOKINGS ====================

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rooms (
            id TEXT PRIMARY KEY,
            number TEXT NOT NULL UNIQUE COLLATE NOCASE CHECK(length(number) > 0 AND length(number) <= 20),
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 100),
            category TEXT NOT NULL,
            capacity INTEGER NOT NULL CHECK(capacity > 0),
            daily_rate REAL NOT NULL CHECK(daily_rate >= 0),
            floor INTEGER,
            description TEXT,
            amenities TEXT,
            status TEXT NOT NULL DEFAULT 'AVAILABLE' CHECK(
                status IN ('AVAILABLE', 'OCCUPIED', 'CLEANING', 'MAINTENANCE', 'BLOCKED')
            ),
            created_by TEXT,
            updated_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS guests (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL CHECK(length(name) >= 2 AND length(name) <= 255),
            email TEXT,
            phone TEXT,
            document TEXT UNIQUE,
            document_type TEXT,
            birth_date DATE,
            nationality TEXT,
            address TEXT,
            city TEXT,
            state TEXT,
            notes TEXT,
            created_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bookings (
            id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL,
            guest_id TEXT NOT NULL,
            check_in DATETIME NOT NULL,
            check_out DATETIME NOT NULL,
            adults INTEGER NOT NULL DEFAULT 1 CHECK(adults >= 1),
            children INTEGER NOT NULL DEFAULT 0 CHECK(children >= 0),
            status TEXT NOT NULL DEFAULT 'PRE_BOOKING' CHECK(
                status IN ('PRE_BOOKING', 'CONFIRMED', 'CHECKED_IN', 'CHECKED_OUT', 'CANCELLED', 'NO_SHOW')
            ),
            total_amount REAL NOT NULL DEFAULT 0 CHECK(total_amount >= 0),
            paid_amount REAL NOT NULL DEFAULT 0 CHECK(paid_amount >= 0),
            source TEXT NOT NULL DEFAULT 'ADMIN',
            notes TEXT,
            checked_in_at DATETIME,
            checked_out_at DATETIME,
            cancelled_at DATETIME,
            created_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            CHECK(check_out > check_in),
            FOREIGN KEY (room_id) REFERENCES rooms (id) ON DELETE RESTRICT,
            FOREIGN KEY (guest_id) REFERENCES guests (id) ON DELETE RESTRICT
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quotes (
            id TEXT PRIMARY KEY,
            guest_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            check_in DATETIME NOT NULL,
            check_out DATETIME NOT NULL,
            adults INTEGER NOT NULL DEFAULT 1 CHECK(adults >= 1),
            children INTEGER NOT NULL DEFAULT 0 CHECK(children >= 0),
            room_id TEXT,
            room_category TEXT,
            total_amount REAL CHECK(total_amount IS NULL OR total_amount >= 0),
            status TEXT NOT NULL DEFAULT 'PENDING' CHECK(
                status IN ('PENDING', 'SENT', 'ACCEPTED', 'REJECTED', 'EXPIRED')
            ),
            source TEXT NOT NULL DEFAULT 'ADMIN',
            notes TEXT,
            booking_id TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            CHECK(check_out > check_in),
            FOREIGN KEY (room_id) REFERENCES rooms (id) ON DELETE SET NULL,
            FOREIGN KEY (booking_id) REFERENCES bookings (id) ON DELETE SET NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // ==================== FINANCIAL ====================

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expense_categories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE CHECK(length(name) > 0 AND length(name) <= 100),
            description TEXT,
            color TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            category_id TEXT NOT NULL,
            description TEXT NOT NULL,
            amount REAL NOT NULL CHECK(amount > 0),
            expense_date DATE NOT NULL,
            payment_method TEXT,
            supplier TEXT,
            notes TEXT,
            purchase_id TEXT,
            maintenance_id TEXT,
            created_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (category_id) REFERENCES expense_categories (id) ON DELETE RESTRICT,
            FOREIGN KEY (purchase_id) REFERENCES stock_purchases (id) ON DELETE SET NULL,
            FOREIGN KEY (maintenance_id) REFERENCES room_maintenance (id) ON DELETE SET NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS revenues (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL DEFAULT 'OTHER' CHECK(
                source IN ('BOOKING', 'EXTRA_SERVICE', 'RESTAURANT', 'EVENT', 'OTHER')
            ),
            description TEXT NOT NULL,
            amount REAL NOT NULL CHECK(amount > 0),
            revenue_date DATE NOT NULL,
            payment_method TEXT,
            booking_id TEXT,
            notes TEXT,
            created_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (booking_id) REFERENCES bookings (id) ON DELETE SET NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL CHECK(kind IN ('INCOME', 'EXPENSE')),
            amount REAL NOT NULL CHECK(amount > 0),
            transaction_date DATE NOT NULL,
            description TEXT NOT NULL,
            expense_id TEXT UNIQUE,
            revenue_id TEXT UNIQUE,
            created_at DATETIME NOT NULL,
            CHECK((expense_id IS NULL) <> (revenue_id IS NULL)),
            FOREIGN KEY (expense_id) REFERENCES expenses (id) ON DELETE CASCADE,
            FOREIGN KEY (revenue_id) REFERENCES revenues (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    // ==================== STOCK ====================

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stock_categories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE CHECK(length(name) > 0 AND length(name) <= 100),
            description TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stock_items (
            id TEXT PRIMARY KEY,
            category_id TEXT NOT NULL,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            unit TEXT NOT NULL CHECK(length(unit) > 0 AND length(unit) <= 20),
            current_stock REAL NOT NULL DEFAULT 0 CHECK(current_stock >= 0),
            minimum_stock REAL NOT NULL DEFAULT 0 CHECK(minimum_stock >= 0),
            unit_cost REAL CHECK(unit_cost IS NULL OR unit_cost >= 0),
            location TEXT,
            notes TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (category_id) REFERENCES stock_categories (id) ON DELETE RESTRICT
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stock_purchases (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            quantity REAL NOT NULL CHECK(quantity > 0),
            unit_cost REAL NOT NULL CHECK(unit_cost >= 0),
            total_cost REAL NOT NULL CHECK(total_cost >= 0),
            supplier TEXT,
            purchase_date DATE NOT NULL,
            notes TEXT,
            expense_id TEXT,
            created_by TEXT,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (item_id) REFERENCES stock_items (id) ON DELETE RESTRICT,
            FOREIGN KEY (expense_id) REFERENCES expenses (id) ON DELETE SET NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stock_movements (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            movement_type TEXT NOT NULL CHECK(movement_type IN ('IN', 'OUT', 'ADJUSTMENT')),
            quantity REAL NOT NULL CHECK(quantity >= 0),
            previous_stock REAL NOT NULL,
            new_stock REAL NOT NULL CHECK(new_stock >= 0),
            reason TEXT,
            purchase_id TEXT,
            created_by TEXT,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (item_id) REFERENCES stock_items (id) ON DELETE CASCADE,
            FOREIGN KEY (purchase_id) REFERENCES stock_purchases (id) ON DELETE SET NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // ==================== OPERATIONS ====================

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS room_maintenance (
            id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL,
            title TEXT NOT NULL CHECK(length(title) > 0 AND length(title) <= 255),
            description TEXT,
            priority TEXT NOT NULL DEFAULT 'MEDIUM' CHECK(priority IN ('LOW', 'MEDIUM', 'HIGH', 'URGENT')),
            status TEXT NOT NULL DEFAULT 'PENDING' CHECK(
                status IN ('PENDING', 'IN_PROGRESS', 'COMPLETED', 'CANCELLED')
            ),
            blocks_room INTEGER NOT NULL DEFAULT 0 CHECK(blocks_room IN (0, 1)),
            assigned_to TEXT,
            scheduled_for DATETIME,
            started_at DATETIME,
            completed_at DATETIME,
            cost REAL CHECK(cost IS NULL OR cost >= 0),
            expense_id TEXT,
            created_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (room_id) REFERENCES rooms (id) ON DELETE CASCADE,
            FOREIGN KEY (expense_id) REFERENCES expenses (id) ON DELETE SET NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staff (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL CHECK(length(name) >= 2 AND length(name) <= 255),
            role TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            hired_on DATE,
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            notes TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shifts (
            id TEXT PRIMARY KEY,
            staff_id TEXT NOT NULL,
            starts_at DATETIME NOT NULL,
            ends_at DATETIME NOT NULL,
            role TEXT,
            notes TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            CHECK(ends_at > starts_at),
            FOREIGN KEY (staff_id) REFERENCES staff (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL CHECK(length(title) > 0 AND length(title) <= 255),
            description TEXT,
            staff_id TEXT,
            room_id TEXT,
            priority TEXT NOT NULL DEFAULT 'MEDIUM' CHECK(priority IN ('LOW', 'MEDIUM', 'HIGH', 'URGENT')),
            status TEXT NOT NULL DEFAULT 'PENDING' CHECK(status IN ('PENDING', 'IN_PROGRESS', 'DONE', 'CANCELLED')),
            due_at DATETIME,
            completed_at DATETIME,
            created_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (staff_id) REFERENCES staff (id) ON DELETE SET NULL,
            FOREIGN KEY (room_id) REFERENCES rooms (id) ON DELETE SET NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pools (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE CHECK(length(name) > 0 AND length(name) <= 100),
            volume_liters REAL CHECK(volume_liters IS NULL OR volume_liters >= 0),
            status TEXT NOT NULL DEFAULT 'OPEN' CHECK(status IN ('OPEN', 'CLOSED', 'MAINTENANCE')),
            ph REAL,
            chlorine REAL,
            temperature REAL,
            last_treatment_at DATETIME,
            notes TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // ==================== CREATE INDEXES ====================

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at)",
        "CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_logs(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_logs(entity_type, entity_id)",
        "CREATE INDEX IF NOT EXISTS idx_rooms_status ON rooms(status)",
        "CREATE INDEX IF NOT EXISTS idx_guests_name ON guests(name)",
        "CREATE INDEX IF NOT EXISTS idx_guests_email ON guests(email)",
        "CREATE INDEX IF NOT EXISTS idx_bookings_room_dates ON bookings(room_id, check_in, check_out)",
        "CREATE INDEX IF NOT EXISTS idx_bookings_guest ON bookings(guest_id)",
        "CREATE INDEX IF NOT EXISTS idx_bookings_status ON bookings(status)",
        "CREATE INDEX IF NOT EXISTS idx_quotes_status ON quotes(status)",
        "CREATE INDEX IF NOT EXISTS idx_expenses_date ON expenses(expense_date)",
        "CREATE INDEX IF NOT EXISTS idx_expenses_category ON expenses(category_id)",
        "CREATE INDEX IF NOT EXISTS idx_revenues_date ON revenues(revenue_date)",
        "CREATE INDEX IF NOT EXISTS idx_revenues_booking ON revenues(booking_id)",
        "CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(transaction_date)",
        "CREATE INDEX IF NOT EXISTS idx_stock_items_category ON stock_items(category_id)",
        "CREATE INDEX IF NOT EXISTS idx_stock_movements_item ON stock_movements(item_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_stock_purchases_item ON stock_purchases(item_id)",
        "CREATE INDEX IF NOT EXISTS idx_maintenance_room ON room_maintenance(room_id)",
        "CREATE INDEX IF NOT EXISTS idx_maintenance_status ON room_maintenance(status)",
        "CREATE INDEX IF NOT EXISTS idx_shifts_staff_time ON shifts(staff_id, starts_at, ends_at)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_staff ON tasks(staff_id)",
    ];

    for statement in indexes {
        sqlx::query(statement).execute(pool).await?;
    }

    seed_organization(pool).await?;

    log::info!("Database migrations completed");
    Ok(())
}

/// The property's single settings row.
async fn seed_organization(pool: &SqlitePool) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO organizations (id, name, check_in_time, check_out_time, created_at, updated_at)
        VALUES (?, 'Pousada Dois Corações', '14:00', '12:00', ?, ?)
        "#,
    )
        .bind(DEFAULT_ORGANIZATION_ID)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

    Ok(())
}

/// Row count per known table, for diagnostics.
pub async fn table_row_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let mut counts = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        // Table names come from the constant list above, never from input
        let query = format!("SELECT COUNT(*) FROM {}", table);
        let count: (i64,) = sqlx::query_as(&query).fetch_one(pool).await?;
        counts.push((table.to_string(), count.0));
    }
    Ok(counts)
}
