use crate::api::attendance::{AdminSessionRow, CheckRequest};
use crate::api::users::{CreateUserRequest, UserSummary};
use crate::model::attendance::AttendanceSession;
use crate::model::role::Role;
use crate::models::{LoginRequest, TokenPairResponse};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Attendance Tracker API",
        version = "1.0.0",
        description = r#"
## Employee Attendance Tracker

Users check in and out with a selfie pair and geolocation; administrators
manage accounts, review records, and export the ledger.

### Key Features
- **Attendance**
  - Check-in/check-out with front/rear photos and location capture
  - Personal attendance history
- **Administration**
  - Account creation and per-user location-tracking toggle
  - CSV report export
  - Ledger purge including archived media

### Security
JWT Bearer authentication; admin-only endpoints re-check the caller's role.
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,

        crate::api::attendance::check_in,
        crate::api::attendance::check_out,
        crate::api::attendance::history,
        crate::api::attendance::list_all,
        crate::api::attendance::purge,

        crate::api::report::export,

        crate::api::users::create_user,
        crate::api::users::list_users,
        crate::api::users::toggle_location,
    ),
    components(
        schemas(
            LoginRequest,
            TokenPairResponse,
            CheckRequest,
            AttendanceSession,
            AdminSessionRow,
            CreateUserRequest,
            UserSummary,
            Role
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login and token lifecycle"),
        (name = "Attendance", description = "Check-in/out and session history"),
        (name = "Report", description = "Attendance export"),
        (name = "Users", description = "Account administration"),
        (name = "Admin", description = "Destructive maintenance operations"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
