use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use utoipa::ToSchema;

/// One check-in-to-check-out attendance record.
///
/// Timestamps stay `String` on purpose: the export path must degrade to
/// "N/A" on values that fail to parse instead of erroring during row
/// decode.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct AttendanceSession {
    pub id: i64,
    pub user_id: i64,
    #[schema(example = "2024-01-01 09:00:00")]
    pub check_in_time: String,
    #[schema(example = "2024-01-01 17:30:00")]
    pub check_out_time: Option<String>,
    pub checkin_front_image: Option<String>,
    pub checkin_rear_image: Option<String>,
    pub checkout_front_image: Option<String>,
    pub checkout_rear_image: Option<String>,
    pub checkin_latitude: Option<f64>,
    pub checkin_longitude: Option<f64>,
    pub checkin_city: Option<String>,
    pub checkin_address: Option<String>,
    pub checkout_latitude: Option<f64>,
    pub checkout_longitude: Option<f64>,
    pub checkout_city: Option<String>,
    pub checkout_address: Option<String>,
    #[schema(example = "checked_in")]
    pub status: String,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    CheckedIn,
    CheckedOut,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::CheckedIn => "checked_in",
            SessionStatus::CheckedOut => "checked_out",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_match_stored_values() {
        assert_eq!(SessionStatus::CheckedIn.as_str(), "checked_in");
        assert_eq!(SessionStatus::CheckedOut.to_string(), "checked_out");
    }
}
