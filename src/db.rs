use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use crate::auth::password::hash_password;

/// Connects the pool, applies the schema, and seeds the default admin
/// account on a fresh database.
pub async fn init_db(database_url: &str, default_admin_password: &str) -> SqlitePool {
    let options = SqliteConnectOptions::from_str(database_url)
        .expect("Invalid DATABASE_URL")
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .expect("Failed to connect to database");

    init_schema(&pool).await.expect("Failed to apply schema");
    seed_default_admin(&pool, default_admin_password)
        .await
        .expect("Failed to seed default admin");

    pool
}

/// Idempotent DDL. The partial unique index is the check-in uniqueness
/// guarantee: at most one `checked_in` row per user, enforced by the
/// database rather than a preceding SELECT.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user',
            location_enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            last_login_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            check_in_time TEXT NOT NULL,
            check_out_time TEXT,
            checkin_front_image TEXT,
            checkin_rear_image TEXT,
            checkout_front_image TEXT,
            checkout_rear_image TEXT,
            checkin_latitude REAL,
            checkin_longitude REAL,
            checkin_city TEXT,
            checkin_address TEXT,
            checkout_latitude REAL,
            checkout_longitude REAL,
            checkout_city TEXT,
            checkout_address TEXT,
            status TEXT NOT NULL DEFAULT 'checked_in'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_active
        ON attendance(user_id) WHERE status = 'checked_in'
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refresh_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            jti TEXT UNIQUE NOT NULL,
            revoked INTEGER NOT NULL DEFAULT 0,
            expires_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Creates the `admin` account if it does not exist yet.
pub async fn seed_default_admin(pool: &SqlitePool, password: &str) -> Result<(), sqlx::Error> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = 'admin' LIMIT 1)",
    )
    .fetch_one(pool)
    .await?;

    if exists {
        return Ok(());
    }

    let hashed = hash_password(password).expect("Failed to hash admin password");

    sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, role)
        VALUES ('admin', 'admin@attendance.com', ?, 'admin')
        "#,
    )
    .bind(hashed)
    .execute(pool)
    .await?;

    info!("Seeded default admin account");
    Ok(())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    // Single connection so every statement sees the same in-memory db.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    init_schema(&pool).await.expect("schema");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::verify_password;

    #[actix_web::test]
    async fn schema_is_idempotent() {
        let pool = test_pool().await;
        init_schema(&pool).await.expect("second apply");
    }

    #[actix_web::test]
    async fn seeds_admin_once() {
        let pool = test_pool().await;
        seed_default_admin(&pool, "admin123").await.unwrap();
        seed_default_admin(&pool, "other-password").await.unwrap();

        let (count, hash): (i64, String) = sqlx::query_as(
            "SELECT COUNT(*), MAX(password_hash) FROM users WHERE username = 'admin'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(count, 1);
        assert!(verify_password("admin123", &hash).is_ok());
    }

    #[actix_web::test]
    async fn active_index_allows_one_open_session_per_user() {
        let pool = test_pool().await;
        sqlx::query(
            "INSERT INTO users (username, email, password_hash) VALUES ('a', 'a@x.com', 'h')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO users (username, email, password_hash) VALUES ('b', 'b@x.com', 'h')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let insert = "INSERT INTO attendance (user_id, check_in_time) VALUES (?, '2024-01-01 09:00:00')";

        sqlx::query(insert).bind(1i64).execute(&pool).await.unwrap();
        // second active row for the same user must hit the partial index
        let err = sqlx::query(insert).bind(1i64).execute(&pool).await;
        assert!(matches!(
            err,
            Err(sqlx::Error::Database(ref db)) if db.is_unique_violation()
        ));

        // a different user is unaffected
        sqlx::query(insert).bind(2i64).execute(&pool).await.unwrap();

        // once checked out, the user may open a new session
        sqlx::query("UPDATE attendance SET status = 'checked_out', check_out_time = '2024-01-01 17:00:00' WHERE user_id = 1")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(insert).bind(1i64).execute(&pool).await.unwrap();
    }
}
