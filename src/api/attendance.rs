use actix_web::{HttpResponse, web};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::auth::auth::AuthUser;
use crate::error::ApiError;
use crate::media::{Camera, Direction, MediaArchive, PurgeOutcome, thumb_name};
use crate::model::attendance::{AttendanceSession, SessionStatus};

/// Shared body for check-in and check-out. Images are base64 data URLs;
/// all fields are optional on the wire.
#[derive(Deserialize, ToSchema)]
pub struct CheckRequest {
    /// Front-camera selfie as a data URL
    pub front_image: Option<String>,
    /// Rear-camera photo as a data URL
    pub rear_image: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[schema(example = "Chennai")]
    pub city: Option<String>,
    pub full_address: Option<String>,
}

/// Location fields as they will be persisted: everything is dropped when
/// the per-user flag is off, regardless of what the client sent.
fn gated_location(
    location_enabled: bool,
    req: &CheckRequest,
) -> (Option<f64>, Option<f64>, Option<String>, Option<String>) {
    if !location_enabled {
        return (None, None, None, None);
    }
    (
        req.latitude,
        req.longitude,
        req.city.clone(),
        req.full_address.clone(),
    )
}

/// Server-side read of the per-user location flag. Token claims and client
/// hints are not trusted for this.
async fn location_enabled_for(pool: &SqlitePool, user_id: i64) -> Result<bool, ApiError> {
    sqlx::query_scalar::<_, bool>("SELECT location_enabled FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}

/// Stores one uploaded image best-effort: a rejected payload logs a
/// warning and yields no filename, it never fails the parent operation.
fn store_image(
    archive: &MediaArchive,
    direction: Direction,
    camera: Camera,
    user_id: i64,
    stamp: &str,
    data_url: Option<&str>,
) -> Option<String> {
    let data_url = data_url?;
    match archive.store(direction, camera, user_id, stamp, data_url) {
        Ok(stored) => Some(stored.filename),
        Err(e) => {
            warn!(user_id, %direction, %camera, error = %e, "Image rejected, continuing without it");
            None
        }
    }
}

pub struct NewSession<'a> {
    pub user_id: i64,
    pub check_in_time: &'a str,
    pub front_image: Option<String>,
    pub rear_image: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub city: Option<String>,
    pub address: Option<String>,
}

/// Opens a session. The partial unique index on active rows is the only
/// double-check-in guard; a violation surfaces as Conflict.
pub async fn insert_active_session(
    pool: &SqlitePool,
    session: NewSession<'_>,
) -> Result<i64, ApiError> {
    let result = sqlx::query(
        r#"
        INSERT INTO attendance
            (user_id, check_in_time, checkin_front_image, checkin_rear_image,
             checkin_latitude, checkin_longitude, checkin_city, checkin_address, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session.user_id)
    .bind(session.check_in_time)
    .bind(&session.front_image)
    .bind(&session.rear_image)
    .bind(session.latitude)
    .bind(session.longitude)
    .bind(&session.city)
    .bind(&session.address)
    .bind(SessionStatus::CheckedIn.as_str())
    .execute(pool)
    .await
    .map_err(|e| ApiError::db_conflict(e, "Already checked in. Please check out first."))?;

    Ok(result.last_insert_rowid())
}

pub struct SessionCheckout<'a> {
    pub user_id: i64,
    pub check_out_time: &'a str,
    pub front_image: Option<String>,
    pub rear_image: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub city: Option<String>,
    pub address: Option<String>,
}

/// Closes the caller's single active session. Zero affected rows means
/// there was nothing to close.
pub async fn complete_active_session(
    pool: &SqlitePool,
    checkout: SessionCheckout<'_>,
) -> Result<(), ApiError> {
    let result = sqlx::query(
        r#"
        UPDATE attendance
        SET check_out_time = ?,
            checkout_front_image = ?,
            checkout_rear_image = ?,
            checkout_latitude = ?,
            checkout_longitude = ?,
            checkout_city = ?,
            checkout_address = ?,
            status = ?
        WHERE user_id = ? AND status = ?
        "#,
    )
    .bind(checkout.check_out_time)
    .bind(&checkout.front_image)
    .bind(&checkout.rear_image)
    .bind(checkout.latitude)
    .bind(checkout.longitude)
    .bind(&checkout.city)
    .bind(&checkout.address)
    .bind(SessionStatus::CheckedOut.as_str())
    .bind(checkout.user_id)
    .bind(SessionStatus::CheckedIn.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(
            "No active check-in found".to_string(),
        ));
    }

    Ok(())
}

/// Check-in with selfie pair and geolocation
#[utoipa::path(
    post,
    path = "/api/v1/attendance/check-in",
    request_body = CheckRequest,
    responses(
        (status = 200, description = "Checked in successfully", body = Object, example = json!({
            "success": true, "message": "Check-in successful!", "id": 1
        })),
        (status = 409, description = "Already checked in", body = Object, example = json!({
            "error": "Already checked in. Please check out first."
        })),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn check_in(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    archive: web::Data<MediaArchive>,
    payload: web::Json<CheckRequest>,
) -> Result<HttpResponse, ApiError> {
    let now = Utc::now().naive_utc();
    let check_in_time = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let stamp = now.format("%Y%m%d_%H%M%S").to_string();

    let location_enabled = location_enabled_for(pool.get_ref(), auth.user_id).await?;
    let (latitude, longitude, city, address) = gated_location(location_enabled, &payload);

    let front_image = store_image(
        &archive,
        Direction::Checkin,
        Camera::Front,
        auth.user_id,
        &stamp,
        payload.front_image.as_deref(),
    );
    let rear_image = store_image(
        &archive,
        Direction::Checkin,
        Camera::Rear,
        auth.user_id,
        &stamp,
        payload.rear_image.as_deref(),
    );

    let id = insert_active_session(
        pool.get_ref(),
        NewSession {
            user_id: auth.user_id,
            check_in_time: &check_in_time,
            front_image,
            rear_image,
            latitude,
            longitude,
            city,
            address,
        },
    )
    .await?;

    info!(user_id = auth.user_id, session_id = id, "Checked in");

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Check-in successful!",
        "id": id
    })))
}

/// Check-out of the active session
#[utoipa::path(
    post,
    path = "/api/v1/attendance/check-out",
    request_body = CheckRequest,
    responses(
        (status = 200, description = "Checked out successfully", body = Object, example = json!({
            "success": true, "message": "Check-out successful!"
        })),
        (status = 404, description = "No active check-in", body = Object, example = json!({
            "error": "No active check-in found"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn check_out(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    archive: web::Data<MediaArchive>,
    payload: web::Json<CheckRequest>,
) -> Result<HttpResponse, ApiError> {
    // Cheap existence probe before writing any files; the UPDATE below is
    // still the authoritative guard.
    let has_active = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM attendance WHERE user_id = ? AND status = ? LIMIT 1)",
    )
    .bind(auth.user_id)
    .bind(SessionStatus::CheckedIn.as_str())
    .fetch_one(pool.get_ref())
    .await?;

    if !has_active {
        return Err(ApiError::NotFound("No active check-in found".to_string()));
    }

    let now = Utc::now().naive_utc();
    let check_out_time = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let stamp = now.format("%Y%m%d_%H%M%S").to_string();

    let location_enabled = location_enabled_for(pool.get_ref(), auth.user_id).await?;
    let (latitude, longitude, city, address) = gated_location(location_enabled, &payload);

    let front_image = store_image(
        &archive,
        Direction::Checkout,
        Camera::Front,
        auth.user_id,
        &stamp,
        payload.front_image.as_deref(),
    );
    let rear_image = store_image(
        &archive,
        Direction::Checkout,
        Camera::Rear,
        auth.user_id,
        &stamp,
        payload.rear_image.as_deref(),
    );

    complete_active_session(
        pool.get_ref(),
        SessionCheckout {
            user_id: auth.user_id,
            check_out_time: &check_out_time,
            front_image,
            rear_image,
            latitude,
            longitude,
            city,
            address,
        },
    )
    .await?;

    info!(user_id = auth.user_id, "Checked out");

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Check-out successful!"
    })))
}

/// The caller's recent sessions
#[utoipa::path(
    get,
    path = "/api/v1/attendance",
    responses(
        (status = 200, description = "Recent sessions, newest first", body = [AttendanceSession]),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn history(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
) -> Result<HttpResponse, ApiError> {
    let sessions = sqlx::query_as::<_, AttendanceSession>(
        r#"
        SELECT * FROM attendance
        WHERE user_id = ?
        ORDER BY check_in_time DESC
        LIMIT 50
        "#,
    )
    .bind(auth.user_id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(sessions))
}

#[derive(serde::Serialize, sqlx::FromRow, ToSchema)]
pub struct AdminSessionRow {
    pub username: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub session: AttendanceSession,
}

/// Recent sessions across all users (admin)
#[utoipa::path(
    get,
    path = "/api/v1/attendance/all",
    responses(
        (status = 200, description = "Recent sessions with usernames", body = [AdminSessionRow]),
        (status = 401, description = "Unauthorized or not an admin")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn list_all(auth: AuthUser, pool: web::Data<SqlitePool>) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let sessions = sqlx::query_as::<_, AdminSessionRow>(
        r#"
        SELECT a.*, u.username
        FROM attendance a
        JOIN users u ON a.user_id = u.id
        ORDER BY a.check_in_time DESC
        LIMIT 50
        "#,
    )
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(sessions))
}

pub struct PurgeReport {
    pub rows_deleted: u64,
    pub files: PurgeOutcome,
}

/// Wipes the ledger and the media directory together. File deletion is
/// best-effort and can never abort the row purge.
pub async fn purge_all(
    pool: &SqlitePool,
    archive: &MediaArchive,
) -> Result<PurgeReport, sqlx::Error> {
    type ImageColumns = (
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
    );

    let rows = sqlx::query_as::<_, ImageColumns>(
        r#"
        SELECT checkin_front_image, checkin_rear_image,
               checkout_front_image, checkout_rear_image
        FROM attendance
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut filenames = Vec::new();
    for (a, b, c, d) in rows {
        for name in [a, b, c, d].into_iter().flatten() {
            filenames.push(thumb_name(&name));
            filenames.push(name);
        }
    }

    let rows_deleted = sqlx::query("DELETE FROM attendance")
        .execute(pool)
        .await?
        .rows_affected();

    let files = archive.remove_all(&filenames);

    Ok(PurgeReport {
        rows_deleted,
        files,
    })
}

/// Delete every session row and all archived media (admin)
#[utoipa::path(
    post,
    path = "/api/v1/admin/purge",
    responses(
        (status = 200, description = "Purge completed", body = Object, example = json!({
            "success": true, "rows_deleted": 3, "files_removed": 5, "files_skipped": ["gone.jpg"]
        })),
        (status = 401, description = "Unauthorized or not an admin"),
        (status = 500, description = "Internal server error")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn purge(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    archive: web::Data<MediaArchive>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let report = purge_all(pool.get_ref(), archive.get_ref()).await?;

    info!(
        rows = report.rows_deleted,
        removed = report.files.removed,
        skipped = report.files.skipped.len(),
        "Ledger purged"
    );

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "rows_deleted": report.rows_deleted,
        "files_removed": report.files.removed,
        "files_skipped": report.files.skipped,
    })))
}
