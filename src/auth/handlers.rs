use std::str::FromStr;

use actix_web::{HttpRequest, HttpResponse, web};
use chrono::DateTime;
use sqlx::SqlitePool;
use tracing::{debug, error, info, instrument};

use crate::{
    auth::{
        jwt::{generate_token, verify_token},
        password::verify_password,
    },
    config::Config,
    error::ApiError,
    model::{role::Role, user::User},
    models::{Claims, LoginRequest, TokenPairResponse, TokenType},
};

/// Persists a refresh token's jti so it can be rotated and revoked.
async fn store_refresh_token(
    pool: &SqlitePool,
    user_id: i64,
    claims: &Claims,
) -> Result<(), sqlx::Error> {
    let expires_at = DateTime::from_timestamp(claims.exp as i64, 0)
        .map(|dt| dt.naive_utc().format("%Y-%m-%d %H:%M:%S").to_string());

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(&claims.jti)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Login with username/password, returning an access + refresh token pair
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token pair issued", body = TokenPairResponse),
        (status = 400, description = "Missing username or password"),
        (status = 401, description = "Invalid credentials"),
        (status = 500, description = "Internal server error")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, body),
    fields(username = %body.username)
)]
pub async fn login(
    body: web::Json<LoginRequest>,
    pool: web::Data<SqlitePool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    if body.username.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::Validation(
            "Username and password are required".to_string(),
        ));
    }

    debug!("Fetching user");

    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT *
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(body.username.trim())
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| {
        info!("Invalid credentials: user not found");
        ApiError::Auth("Invalid username or password".to_string())
    })?;

    if let Err(e) = verify_password(&body.password, &user.password_hash) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(ApiError::Auth("Invalid username or password".to_string()));
    }

    let role = Role::from_str(&user.role).map_err(|_| {
        error!(user_id = user.id, role = %user.role, "Unknown role stored for user");
        ApiError::Auth("Invalid role".to_string())
    })?;

    let (access_token, _) = generate_token(
        user.id,
        user.username.clone(),
        role,
        TokenType::Access,
        &config.jwt_secret,
        config.access_token_ttl,
    )
    .map_err(|e| {
        error!(error = %e, "Failed to sign access token");
        ApiError::Auth("Token generation failed".to_string())
    })?;

    let (refresh_token, refresh_claims) = generate_token(
        user.id,
        user.username.clone(),
        role,
        TokenType::Refresh,
        &config.jwt_secret,
        config.refresh_token_ttl,
    )
    .map_err(|e| {
        error!(error = %e, "Failed to sign refresh token");
        ApiError::Auth("Token generation failed".to_string())
    })?;

    debug!(user_id = user.id, jti = %refresh_claims.jti, "Storing refresh token");
    store_refresh_token(pool.get_ref(), user.id, &refresh_claims).await?;

    // Non-fatal: login still succeeds if this write fails.
    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = datetime('now') WHERE id = ?")
        .bind(user.id)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to update last_login_at");
    }

    info!("Login successful");

    Ok(HttpResponse::Ok().json(TokenPairResponse {
        access_token,
        refresh_token,
    }))
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Rotate a refresh token: revoke the presented one, issue a new pair
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "New token pair issued", body = TokenPairResponse),
        (status = 401, description = "Missing, invalid, or revoked refresh token")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<SqlitePool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    let token = bearer_token(&req).ok_or_else(|| ApiError::Auth("No token".to_string()))?;

    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| ApiError::Auth("Invalid or expired token".to_string()))?;

    if claims.token_type != TokenType::Refresh {
        return Err(ApiError::Auth("Not a refresh token".to_string()));
    }

    let record = sqlx::query_as::<_, (i64, i64, i64)>(
        r#"
        SELECT id, user_id, revoked
        FROM refresh_tokens
        WHERE jti = ?
        "#,
    )
    .bind(&claims.jti)
    .fetch_optional(pool.get_ref())
    .await?;

    let (record_id, user_id) = match record {
        Some((id, user_id, revoked)) if revoked == 0 => (id, user_id),
        _ => return Err(ApiError::Auth("Refresh token revoked".to_string())),
    };

    sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE id = ?")
        .bind(record_id)
        .execute(pool.get_ref())
        .await?;

    let (new_refresh_token, new_claims) = generate_token(
        claims.user_id,
        claims.sub.clone(),
        claims.role,
        TokenType::Refresh,
        &config.jwt_secret,
        config.refresh_token_ttl,
    )
    .map_err(|e| {
        error!(error = %e, "Failed to sign refresh token");
        ApiError::Auth("Token generation failed".to_string())
    })?;

    store_refresh_token(pool.get_ref(), user_id, &new_claims).await?;

    let (access_token, _) = generate_token(
        claims.user_id,
        claims.sub.clone(),
        claims.role,
        TokenType::Access,
        &config.jwt_secret,
        config.access_token_ttl,
    )
    .map_err(|e| {
        error!(error = %e, "Failed to sign access token");
        ApiError::Auth("Token generation failed".to_string())
    })?;

    Ok(HttpResponse::Ok().json(TokenPairResponse {
        access_token,
        refresh_token: new_refresh_token,
    }))
}

/// Revoke the presented refresh token. Responds 204 regardless of whether
/// the token was known
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Logged out")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<SqlitePool>,
    config: web::Data<Config>,
) -> HttpResponse {
    let Some(token) = bearer_token(&req) else {
        return HttpResponse::NoContent().finish();
    };

    let Ok(claims) = verify_token(token, &config.jwt_secret) else {
        return HttpResponse::NoContent().finish();
    };

    if claims.token_type != TokenType::Refresh {
        return HttpResponse::NoContent().finish();
    }

    // Idempotent revocation.
    let _ = sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE jti = ?")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await;

    HttpResponse::NoContent().finish()
}
