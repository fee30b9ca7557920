//! Boundary error type and the single place errors become HTTP responses.
//!
//! Handlers return `Result<_, ApiError>`; request guards hand their failure to
//! [`guard_failure`], which stashes the rendered report so the catchers
//! registered in [`catchers`] can replay it verbatim.

use parking_lot::Mutex;
use rocket::http::Status;
use rocket::request::Outcome;
use rocket::response::{self, Responder, status};
use rocket::serde::json::Json;
use rocket::{Catcher, Request};
use rocket_db_pools::sqlx;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::response::OpenApiResponderInner;
use serde_json::{Value, json};
use thiserror::Error;

use crate::auth::AuthError;
use crate::users::UserStoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("user with this email already exists")]
    UserAlreadyExists,
    #[error("role already exists")]
    RoleAlreadyExists,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<UserStoreError> for ApiError {
    fn from(err: UserStoreError) -> Self {
        match err {
            UserStoreError::DuplicateEmail(_) => ApiError::UserAlreadyExists,
            UserStoreError::DuplicateRole(_) => ApiError::RoleAlreadyExists,
            UserStoreError::UserNotFound(id) => ApiError::NotFound(format!("User {id} not found")),
            UserStoreError::RoleNotFound(id) => ApiError::NotFound(format!("Role {id} not found")),
            UserStoreError::Database(err) => ApiError::Database(err),
        }
    }
}

/// Status and JSON body for one failed request.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    pub status: Status,
    pub body: Value,
}

impl ErrorReport {
    fn coded(status: Status, message: impl Into<String>, error_code: &str) -> Self {
        Self {
            status,
            body: json!({ "message": message.into(), "error_code": error_code }),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: Status::InternalServerError,
            body: json!({
                "error": "Internal Server Error",
                "message": "An unexpected error occurred",
            }),
        }
    }

    pub fn validation(status: Status) -> Self {
        Self {
            status,
            body: json!({
                "error": "Validation Error",
                "message": "Input validation failed",
            }),
        }
    }
}

impl<'r> Responder<'r, 'static> for ErrorReport {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        status::Custom(self.status, Json(self.body)).respond_to(request)
    }
}

impl ApiError {
    /// Render this error as it is shown to clients. Internal failures
    /// collapse to the generic 500 body.
    pub fn report(&self) -> ErrorReport {
        match self {
            ApiError::Auth(err) => auth_report(err),
            ApiError::UserAlreadyExists => ErrorReport::coded(
                Status::BadRequest,
                "User with this email already Exist",
                "auth_create_user",
            ),
            ApiError::RoleAlreadyExists => {
                ErrorReport::coded(Status::BadRequest, "Role already exists", "role_exists")
            }
            ApiError::NotFound(what) => ErrorReport::coded(Status::NotFound, what, "not_found"),
            ApiError::BadRequest(msg) => ErrorReport::coded(Status::BadRequest, msg, "bad_request"),
            ApiError::Database(_) | ApiError::Internal(_) => ErrorReport::internal(),
        }
    }

    pub fn status(&self) -> Status {
        self.report().status
    }

    fn log(&self) {
        let status = self.status();
        if status.code >= 500 {
            log::error!("request failed with {}: {}", status.code, self);
        } else {
            log::debug!("request rejected with {}: {}", status.code, self);
        }
    }
}

fn auth_report(err: &AuthError) -> ErrorReport {
    let status = err.status();
    match (err, err.public_message(), err.error_code()) {
        (AuthError::RefreshExpired, Some(message), _) => ErrorReport {
            status,
            body: json!({ "detail": message }),
        },
        (AuthError::InsufficientPermission(denial), Some(message), Some(code)) => ErrorReport {
            status,
            body: json!({
                "message": message,
                "error_code": code,
                "detail": denial.to_string(),
            }),
        },
        (_, Some(message), Some(code)) => ErrorReport::coded(status, message, code),
        _ => ErrorReport::internal(),
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        self.log();
        self.report().respond_to(request)
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(_generator: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        for (code, description) in [
            ("400", "Bad request or duplicate resource"),
            ("401", "Invalid credentials or expired refresh token"),
            ("403", "Missing, invalid, revoked or insufficient credentials"),
            ("404", "Resource not found"),
            ("500", "Unexpected server error"),
            ("503", "Token revocation service unavailable"),
        ] {
            responses.responses.insert(
                code.to_owned(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_owned(),
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

/// Most recent guard failure for the current request.
#[derive(Default)]
struct CachedFailure(Mutex<Option<ErrorReport>>);

/// Record a guard failure so the catcher renders the same body the handler
/// would have, and turn it into a failed outcome.
pub fn guard_failure<S>(request: &Request<'_>, err: ApiError) -> Outcome<S, ApiError> {
    err.log();
    let report = err.report();
    let status = report.status;
    *request.local_cache(CachedFailure::default).0.lock() = Some(report);
    Outcome::Error((status, err))
}

fn cached_failure(request: &Request<'_>, status: Status) -> Option<ErrorReport> {
    request
        .local_cache(CachedFailure::default)
        .0
        .lock()
        .take()
        .filter(|report| report.status == status)
}

#[catch(default)]
fn default_catcher(status: Status, request: &Request<'_>) -> ErrorReport {
    if let Some(report) = cached_failure(request, status) {
        return report;
    }

    match status.code {
        400 | 422 => ErrorReport::validation(status),
        404 => ErrorReport::coded(status, "Resource not found", "not_found"),
        500..=599 => ErrorReport::internal(),
        _ => ErrorReport {
            status,
            body: json!({
                "error": status.reason().unwrap_or("Error"),
                "message": status.reason().unwrap_or("Request failed"),
            }),
        },
    }
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::error::Denial;
    use crate::auth::permissions::Permission;

    #[test]
    fn invalid_credentials_body() {
        let report = ApiError::from(AuthError::InvalidCredentials).report();
        assert_eq!(report.status, Status::Unauthorized);
        assert_eq!(
            report.body,
            json!({ "message": "Invalid credentials", "error_code": "auth_login" })
        );
    }

    #[test]
    fn expired_refresh_uses_detail_only() {
        let report = ApiError::from(AuthError::RefreshExpired).report();
        assert_eq!(report.status, Status::Unauthorized);
        assert_eq!(
            report.body,
            json!({ "detail": "Invalid or expired refresh token" })
        );
    }

    #[test]
    fn permission_denial_carries_detail() {
        let report = ApiError::from(AuthError::InsufficientPermission(Denial::Permission {
            permission: Permission::ReadRoles,
            role: Some("user".into()),
        }))
        .report();
        assert_eq!(report.status, Status::Forbidden);
        assert_eq!(report.body["error_code"], "insufficient_permissions");
        let detail = report.body["detail"].as_str().unwrap_or_default();
        assert!(detail.contains("read_roles"));
        assert!(detail.contains("user"));
    }

    #[test]
    fn internal_failures_do_not_leak_detail() {
        for err in [
            ApiError::from(AuthError::MalformedHash("$argon2id$broken".into())),
            ApiError::Internal("secret path /etc/app".into()),
            ApiError::Database(sqlx::Error::PoolTimedOut),
        ] {
            let report = err.report();
            assert_eq!(report, ErrorReport::internal());
        }
    }

    #[test]
    fn store_errors_map_to_client_errors() {
        assert_eq!(
            ApiError::from(UserStoreError::DuplicateEmail("a@b.c".into())).report(),
            ErrorReport::coded(
                Status::BadRequest,
                "User with this email already Exist",
                "auth_create_user"
            )
        );
        assert_eq!(
            ApiError::from(UserStoreError::DuplicateRole("admin".into())).status(),
            Status::BadRequest
        );
        assert_eq!(
            ApiError::from(UserStoreError::RoleNotFound(7)).status(),
            Status::NotFound
        );
    }

    #[test]
    fn revocation_outage_is_503() {
        let report = ApiError::from(AuthError::RevocationUnavailable("timeout".into())).report();
        assert_eq!(report.status, Status::ServiceUnavailable);
        assert_eq!(report.body["error_code"], "revocation_unavailable");
    }
}
