use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use std::error::Error as StdError;
use thiserror::Error;

use crate::logging::SecurityEvent;

/// Centralized application error type that encompasses all error variants
/// across different modules and provides consistent error responses.
#[derive(Debug, Error)]
pub enum AppError {
    // Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    // Resource errors
    #[error("no note matches the requested identifier")]
    NotFound,

    #[error("resource conflict: {0}")]
    Conflict(String),

    // Database errors
    #[error("database error")]
    Database(#[source] DieselError),

    #[error("connection pool error: {0}")]
    Pool(String),

    // Session and rendering errors
    #[error("session error")]
    Session(#[from] tower_sessions::session::Error),

    #[error("template rendering error")]
    Template(#[from] askama::Error),

    #[error("failed to hash password: {0}")]
    PasswordHashing(String),

    // Rate limiting
    #[error("rate limit exceeded; please try again later")]
    RateLimitExceeded,

    // Request parsing errors
    #[error("invalid form submission: {0}")]
    InvalidForm(String),

    #[error("unsupported media type: expected a form submission")]
    UnsupportedMediaType,

    #[error("request body too large")]
    PayloadTooLarge,
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorPage {
    status: u16,
    reason: String,
    message: String,
}

impl AppError {
    /// Maps a Diesel error to an appropriate AppError variant
    pub fn from_diesel(error: DieselError) -> Self {
        match error {
            DieselError::NotFound => AppError::NotFound,
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                let constraint = info
                    .constraint_name()
                    .unwrap_or("unique constraint")
                    .to_string();
                AppError::Conflict(format!("duplicate value violates {}", constraint))
            }
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                AppError::Conflict("foreign key constraint violation".to_string())
            }
            other => AppError::Database(other),
        }
    }

    /// Determines the HTTP status code for this error
    fn status_code(&self) -> StatusCode {
        match self {
            // 4xx Client errors
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidForm(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,

            // 5xx Server errors
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::PasswordHashing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Determines if error details should be exposed to the client
    /// In production (release builds), we hide internal error details
    fn should_expose_details(&self) -> bool {
        if cfg!(debug_assertions) {
            true
        } else {
            matches!(
                self,
                AppError::Validation(_)
                    | AppError::InvalidForm(_)
                    | AppError::Conflict(_)
                    | AppError::NotFound
                    | AppError::UnsupportedMediaType
                    | AppError::PayloadTooLarge
                    | AppError::RateLimitExceeded
            )
        }
    }

    /// Gets the user-facing error message
    fn user_message(&self) -> String {
        if self.should_expose_details() {
            self.to_string()
        } else {
            match self {
                AppError::Database(_) => "a database error occurred".to_string(),
                AppError::Pool(_) => "service temporarily unavailable".to_string(),
                AppError::Session(_) => "session error".to_string(),
                AppError::Template(_) => "page rendering error".to_string(),
                AppError::PasswordHashing(_) => "password processing error".to_string(),
                _ => self.to_string(),
            }
        }
    }

    /// Logs the error with appropriate context
    /// This allows internal errors to be logged even when not exposed to clients
    fn log_error(&self) {
        match self.status_code() {
            code if code.is_client_error() => match self {
                AppError::RateLimitExceeded => {
                    crate::log_security_event!(
                        SecurityEvent::RateLimitExceeded,
                        error = %self,
                        status_code = %code,
                        "Request rejected by rate limiter"
                    );
                }
                _ => {
                    tracing::warn!(
                        error = %self,
                        status_code = %code,
                        "Client error"
                    );
                }
            },
            code if code.is_server_error() => {
                tracing::error!(
                    error = %self,
                    status_code = %code,
                    source = ?self.source(),
                    "Server error"
                );
            }
            _ => {}
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the error before converting to response
        self.log_error();

        let status = self.status_code();
        let page = ErrorPage {
            status: status.as_u16(),
            reason: status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            message: self.user_message(),
        };

        match page.render() {
            Ok(body) => (status, Html(body)).into_response(),
            // Rendering the error page itself failed; fall back to plain text.
            Err(err) => {
                tracing::error!(error = %err, "Failed to render error page");
                (status, self.user_message()).into_response()
            }
        }
    }
}

impl From<DieselError> for AppError {
    fn from(error: DieselError) -> Self {
        AppError::from_diesel(error)
    }
}

impl From<argon2::password_hash::Error> for AppError {
    fn from(error: argon2::password_hash::Error) -> Self {
        AppError::PasswordHashing(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_status() {
        let error = AppError::Validation("invalid input".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_error_status() {
        let error = AppError::NotFound;
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_rate_limit_error_status() {
        let error = AppError::RateLimitExceeded;
        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_unique_violation_maps_to_conflict() {
        let error = AppError::from_diesel(DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key".to_string()),
        ));
        assert!(matches!(error, AppError::Conflict(_)));
    }

    #[test]
    fn test_diesel_not_found_maps_to_not_found() {
        let error = AppError::from_diesel(DieselError::NotFound);
        assert!(matches!(error, AppError::NotFound));
    }

    #[test]
    fn test_validation_error_is_exposed() {
        let error = AppError::Validation("test error".to_string());
        assert!(error.should_expose_details());
    }

    #[test]
    fn test_client_errors_have_detailed_messages() {
        let error = AppError::Validation("field 'title' is too long".to_string());
        assert!(error.user_message().contains("field 'title' is too long"));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_internal_errors_exposed_in_debug() {
        let error = AppError::Database(DieselError::NotFound);
        assert!(error.should_expose_details());
    }
}
