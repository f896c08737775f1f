use actix_web::{HttpResponse, web};
use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use tracing::error;

use crate::auth::auth::AuthUser;
use crate::error::ApiError;

const HEADERS: [&str; 7] = [
    "User",
    "Check In",
    "Check Out",
    "Duration (hrs)",
    "Check-in Location",
    "Check-out Location",
    "Status",
];

#[derive(sqlx::FromRow)]
pub struct ReportRow {
    pub username: String,
    pub check_in_time: String,
    pub check_out_time: Option<String>,
    pub checkin_city: Option<String>,
    pub checkin_latitude: Option<f64>,
    pub checkin_longitude: Option<f64>,
    pub checkout_city: Option<String>,
    pub checkout_latitude: Option<f64>,
    pub checkout_longitude: Option<f64>,
    pub status: String,
}

/// Stored timestamps are TEXT; accept the space- and T-separated forms.
fn parse_ts(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

/// Elapsed hours to two decimals; "N/A" for open sessions and for
/// timestamps that fail to parse. Never errors.
fn duration_hours(check_in: &str, check_out: Option<&str>) -> String {
    let Some(check_out) = check_out else {
        return "N/A".to_string();
    };
    match (parse_ts(check_in), parse_ts(check_out)) {
        (Some(start), Some(end)) => {
            let hours = (end - start).num_seconds() as f64 / 3600.0;
            format!("{hours:.2}")
        }
        _ => "N/A".to_string(),
    }
}

/// "<city> (<lat>, <lon>)" with coordinates to four decimals; degrades to
/// whichever parts are present, "N/A" when neither is.
fn format_location(city: Option<&str>, lat: Option<f64>, lon: Option<f64>) -> String {
    let coords = match (lat, lon) {
        (Some(lat), Some(lon)) => Some(format!("({lat:.4}, {lon:.4})")),
        _ => None,
    };
    match (city, coords) {
        (Some(city), Some(coords)) => format!("{city} {coords}"),
        (Some(city), None) => city.to_string(),
        (None, Some(coords)) => coords,
        (None, None) => "N/A".to_string(),
    }
}

pub async fn fetch_report_rows(pool: &SqlitePool) -> Result<Vec<ReportRow>, sqlx::Error> {
    sqlx::query_as::<_, ReportRow>(
        r#"
        SELECT u.username, a.check_in_time, a.check_out_time,
               a.checkin_city, a.checkin_latitude, a.checkin_longitude,
               a.checkout_city, a.checkout_latitude, a.checkout_longitude,
               a.status
        FROM attendance a
        JOIN users u ON a.user_id = u.id
        ORDER BY a.check_in_time DESC
        "#,
    )
    .fetch_all(pool)
    .await
}

/// One CSV line per session plus the header row, which is present even for
/// an empty ledger.
pub fn write_report_csv(rows: &[ReportRow]) -> Result<Vec<u8>, ApiError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let build_err = |e: &dyn std::fmt::Display| {
        error!(error = %e, "Failed to build report");
        ApiError::Storage("Failed to build report".to_string())
    };

    writer.write_record(HEADERS).map_err(|e| build_err(&e))?;

    for row in rows {
        let duration = duration_hours(&row.check_in_time, row.check_out_time.as_deref());
        let checkin_location = format_location(
            row.checkin_city.as_deref(),
            row.checkin_latitude,
            row.checkin_longitude,
        );
        let checkout_location = format_location(
            row.checkout_city.as_deref(),
            row.checkout_latitude,
            row.checkout_longitude,
        );

        writer
            .write_record([
                row.username.as_str(),
                row.check_in_time.as_str(),
                row.check_out_time.as_deref().unwrap_or("N/A"),
                duration.as_str(),
                checkin_location.as_str(),
                checkout_location.as_str(),
                row.status.as_str(),
            ])
            .map_err(|e| build_err(&e))?;
    }

    writer.into_inner().map_err(|e| build_err(&e))
}

/// Download the attendance report as a spreadsheet (admin)
#[utoipa::path(
    get,
    path = "/api/v1/report/export",
    responses(
        (status = 200, description = "CSV attachment, one row per session", body = String, content_type = "text/csv"),
        (status = 401, description = "Unauthorized or not an admin"),
        (status = 500, description = "Internal server error")
    ),
    security(("bearer_auth" = [])),
    tag = "Report"
)]
pub async fn export(auth: AuthUser, pool: web::Data<SqlitePool>) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let rows = fetch_report_rows(pool.get_ref()).await?;
    let body = write_report_csv(&rows)?;

    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header((
            "Content-Disposition",
            "attachment; filename=\"attendance_report.csv\"",
        ))
        .body(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::attendance::{NewSession, insert_active_session};
    use crate::db::test_pool;

    fn row(username: &str, check_in: &str, check_out: Option<&str>) -> ReportRow {
        ReportRow {
            username: username.to_string(),
            check_in_time: check_in.to_string(),
            check_out_time: check_out.map(str::to_string),
            checkin_city: None,
            checkin_latitude: None,
            checkin_longitude: None,
            checkout_city: None,
            checkout_latitude: None,
            checkout_longitude: None,
            status: if check_out.is_some() {
                "checked_out".to_string()
            } else {
                "checked_in".to_string()
            },
        }
    }

    #[test]
    fn duration_is_formatted_to_two_decimals() {
        assert_eq!(
            duration_hours("2024-01-01 09:00:00", Some("2024-01-01 17:30:00")),
            "8.50"
        );
    }

    #[test]
    fn duration_degrades_to_na() {
        assert_eq!(duration_hours("2024-01-01 09:00:00", None), "N/A");
        assert_eq!(
            duration_hours("not a timestamp", Some("2024-01-01 17:30:00")),
            "N/A"
        );
        assert_eq!(duration_hours("2024-01-01 09:00:00", Some("garbage")), "N/A");
    }

    #[test]
    fn location_renders_available_parts() {
        assert_eq!(
            format_location(Some("Avadi"), Some(13.105532), Some(80.09931)),
            "Avadi (13.1055, 80.0993)"
        );
        assert_eq!(format_location(Some("Avadi"), None, None), "Avadi");
        assert_eq!(
            format_location(None, Some(13.105532), Some(80.09931)),
            "(13.1055, 80.0993)"
        );
        assert_eq!(format_location(None, None, Some(80.0)), "N/A");
        assert_eq!(format_location(None, None, None), "N/A");
    }

    #[test]
    fn empty_ledger_still_gets_a_header() {
        let bytes = write_report_csv(&[]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("User,Check In,Check Out"));
    }

    #[test]
    fn one_line_per_session() {
        let rows = vec![
            row("alice", "2024-01-01 09:00:00", Some("2024-01-01 17:30:00")),
            row("bob", "2024-01-02 08:45:00", None),
        ];
        let text = String::from_utf8(write_report_csv(&rows).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("alice"));
        assert!(lines[1].contains("8.50"));
        assert!(lines[2].contains("N/A"));
    }

    #[actix_web::test]
    async fn rows_are_joined_and_ordered_newest_first() {
        let pool = test_pool().await;
        sqlx::query(
            "INSERT INTO users (username, email, password_hash) VALUES ('alice', 'a@x.com', 'h')",
        )
        .execute(&pool)
        .await
        .unwrap();

        insert_active_session(
            &pool,
            NewSession {
                user_id: 1,
                check_in_time: "2024-01-01 09:00:00",
                front_image: None,
                rear_image: None,
                latitude: None,
                longitude: None,
                city: None,
                address: None,
            },
        )
        .await
        .unwrap();
        sqlx::query("UPDATE attendance SET status = 'checked_out', check_out_time = '2024-01-01 10:00:00'")
            .execute(&pool)
            .await
            .unwrap();
        insert_active_session(
            &pool,
            NewSession {
                user_id: 1,
                check_in_time: "2024-01-02 09:00:00",
                front_image: None,
                rear_image: None,
                latitude: None,
                longitude: None,
                city: None,
                address: None,
            },
        )
        .await
        .unwrap();

        let rows = fetch_report_rows(&pool).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].check_in_time, "2024-01-02 09:00:00");
        assert_eq!(rows[0].username, "alice");
    }
}
