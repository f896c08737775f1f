use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::auth::auth::AuthUser;
use crate::auth::password::hash_password;
use crate::error::ApiError;
use crate::model::role::Role;
use crate::utils::username_cache;
use crate::utils::username_filter;

fn default_role() -> Role {
    Role::User
}

fn default_location_enabled() -> bool {
    true
}

#[derive(Deserialize, ToSchema)]
pub struct CreateUserRequest {
    #[schema(example = "jdoe")]
    pub username: String,
    #[schema(example = "jdoe@company.com")]
    pub email: String,
    pub password: String,
    #[serde(default = "default_role")]
    #[schema(example = "user")]
    pub role: Role,
    #[serde(default = "default_location_enabled")]
    pub location_enabled: bool,
}

#[derive(Serialize, sqlx::FromRow, ToSchema)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[schema(example = "user")]
    pub role: String,
    pub location_enabled: bool,
    pub created_at: Option<String>,
}

/// true  => username AVAILABLE
/// false => username TAKEN
pub async fn is_username_available(username: &str, pool: &SqlitePool) -> bool {
    let username = username.to_lowercase();

    // Cuckoo filter first: a miss is a definitive "available".
    if !username_filter::might_exist(&username) {
        return true;
    }

    // Moka cache: a hit is a definitive "taken".
    if username_cache::is_taken(&username).await {
        return false;
    }

    // Database fallback.
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ? LIMIT 1)",
    )
    .bind(&username)
    .fetch_one(pool)
    .await
    .unwrap_or(true); // fail-safe

    !exists
}

/// Validates, hashes, and inserts the account. The table's unique
/// constraints are the source of truth for duplicates.
pub async fn create_user_record(
    pool: &SqlitePool,
    req: &CreateUserRequest,
) -> Result<i64, ApiError> {
    let username = req.username.trim();
    let email = req.email.trim();

    if username.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation("All fields are required".to_string()));
    }

    let hashed = hash_password(&req.password).map_err(|e| {
        error!(error = %e, "Failed to hash password");
        ApiError::Storage("Failed to hash password".to_string())
    })?;

    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, role, location_enabled)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(username)
    .bind(email)
    .bind(hashed)
    .bind(req.role.as_str())
    .bind(req.location_enabled)
    .execute(pool)
    .await
    .map_err(|e| ApiError::db_conflict(e, "Username or email already exists"))?;

    Ok(result.last_insert_rowid())
}

/// Flips the per-user location flag, returning the new value.
pub async fn toggle_location_flag(pool: &SqlitePool, user_id: i64) -> Result<bool, ApiError> {
    let result = sqlx::query("UPDATE users SET location_enabled = NOT location_enabled WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    let enabled = sqlx::query_scalar::<_, bool>("SELECT location_enabled FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(enabled)
}

/// Create an account (admin)
#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Account created", body = Object, example = json!({
            "message": "User jdoe added successfully", "id": 2
        })),
        (status = 400, description = "Missing required field"),
        (status = 409, description = "Duplicate username or email", body = Object, example = json!({
            "error": "Username or email already exists"
        })),
        (status = 401, description = "Unauthorized or not an admin")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    payload: web::Json<CreateUserRequest>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let username = payload.username.trim();

    if !username.is_empty() && !is_username_available(username, pool.get_ref()).await {
        return Err(ApiError::Conflict("Username already taken".to_string()));
    }

    let id = create_user_record(pool.get_ref(), &payload).await?;

    // Keep the availability structures warm for the next lookup.
    username_filter::insert(username);
    username_cache::mark_taken(username).await;

    info!(user_id = id, username, "Account created");

    Ok(HttpResponse::Created().json(json!({
        "message": format!("User {username} added successfully"),
        "id": id
    })))
}

/// List all accounts without password hashes (admin)
#[utoipa::path(
    get,
    path = "/api/v1/users",
    responses(
        (status = 200, description = "All accounts", body = [UserSummary]),
        (status = 401, description = "Unauthorized or not an admin")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn list_users(auth: AuthUser, pool: web::Data<SqlitePool>) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let users = sqlx::query_as::<_, UserSummary>(
        r#"
        SELECT id, username, email, role, location_enabled, created_at
        FROM users
        ORDER BY id
        "#,
    )
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(users))
}

/// Flip an account's location-tracking flag (admin)
#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/toggle-location",
    params(("id", Path, description = "User ID")),
    responses(
        (status = 200, description = "Flag flipped", body = Object, example = json!({
            "id": 2, "location_enabled": false
        })),
        (status = 404, description = "User not found"),
        (status = 401, description = "Unauthorized or not an admin")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn toggle_location(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let user_id = path.into_inner();
    let enabled = toggle_location_flag(pool.get_ref(), user_id).await?;

    info!(user_id, location_enabled = enabled, "Location flag toggled");

    Ok(HttpResponse::Ok().json(json!({
        "id": user_id,
        "location_enabled": enabled
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn request(username: &str, email: &str) -> CreateUserRequest {
        CreateUserRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: "pw123456".to_string(),
            role: Role::User,
            location_enabled: true,
        }
    }

    #[actix_web::test]
    async fn duplicate_username_conflicts_and_leaves_row_unchanged() {
        let pool = test_pool().await;

        create_user_record(&pool, &request("jdoe", "jdoe@x.com"))
            .await
            .unwrap();

        let err = create_user_record(&pool, &request("jdoe", "other@x.com")).await;
        assert!(matches!(err, Err(ApiError::Conflict(_))));

        let (count, email): (i64, String) =
            sqlx::query_as("SELECT COUNT(*), MAX(email) FROM users WHERE username = 'jdoe'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 1);
        assert_eq!(email, "jdoe@x.com");
    }

    #[actix_web::test]
    async fn duplicate_email_conflicts() {
        let pool = test_pool().await;

        create_user_record(&pool, &request("jdoe", "shared@x.com"))
            .await
            .unwrap();
        let err = create_user_record(&pool, &request("other", "shared@x.com")).await;
        assert!(matches!(err, Err(ApiError::Conflict(_))));
    }

    #[actix_web::test]
    async fn missing_fields_are_rejected() {
        let pool = test_pool().await;

        let err = create_user_record(&pool, &request("", "jdoe@x.com")).await;
        assert!(matches!(err, Err(ApiError::Validation(_))));

        let mut req = request("jdoe", "jdoe@x.com");
        req.password = String::new();
        let err = create_user_record(&pool, &req).await;
        assert!(matches!(err, Err(ApiError::Validation(_))));
    }

    #[actix_web::test]
    async fn toggle_flips_the_flag() {
        let pool = test_pool().await;
        let id = create_user_record(&pool, &request("jdoe", "jdoe@x.com"))
            .await
            .unwrap();

        assert!(!toggle_location_flag(&pool, id).await.unwrap());
        assert!(toggle_location_flag(&pool, id).await.unwrap());
    }

    #[actix_web::test]
    async fn toggle_unknown_user_is_not_found() {
        let pool = test_pool().await;
        let err = toggle_location_flag(&pool, 999).await;
        assert!(matches!(err, Err(ApiError::NotFound(_))));
    }
}
