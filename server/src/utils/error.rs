use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use crate::models::ModelError;
use crate::providers::{IdentityError, StorageError};
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Edit not allowed: {0}")]
    EditNotAllowed(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not modified")]
    NotModified,

    #[error("Store error: {0}")]
    StoreError(ModelError),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::EditNotAllowed(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotModified => StatusCode::NOT_MODIFIED,
            AppError::StoreError(_)
            | AppError::ExternalServiceError(_)
            | AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::EditNotAllowed(_) => "EDIT_NOT_ALLOWED",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "ALREADY_EXISTS",
            AppError::NotModified => "NOT_MODIFIED",
            AppError::StoreError(_) => "DATABASE_ERROR",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::StoreError(e) => error!(error = ?e, "Store error"),
            AppError::ExternalServiceError(msg) | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::NotModified => {}
            AppError::ValidationError(msg)
            | AppError::EditNotAllowed(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg) => {
                warn!(code = self.code(), message = %msg, "Request rejected");
            }
        }
    }

    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{what} not found"))
    }
}

impl From<ModelError> for AppError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NotFound => AppError::NotFound(err.to_string()),
            ModelError::AlreadyExists => AppError::Conflict(err.to_string()),
            ModelError::NoDocumentModified => AppError::NotModified,
            ModelError::EditNotAllowed(_) => AppError::EditNotAllowed(err.to_string()),
            ModelError::Malformed(msg) => AppError::ValidationError(msg),
            other => AppError::StoreError(other),
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidToken => AppError::AuthError(err.to_string()),
            IdentityError::UserNotFound => AppError::NotFound(err.to_string()),
            other => AppError::ExternalServiceError(other.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::ExternalServiceError(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        if status == StatusCode::NOT_MODIFIED {
            return status.into_response();
        }

        // Only expose high-level message to the client
        let public_message = match &self {
            AppError::StoreError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) | AppError::ExternalServiceError(_) => {
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        error_response(code, public_message, None, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_errors_map_to_status_families() {
        let cases = [
            (ModelError::NotFound, StatusCode::NOT_FOUND),
            (ModelError::AlreadyExists, StatusCode::CONFLICT),
            (ModelError::NoDocumentModified, StatusCode::NOT_MODIFIED),
            (ModelError::EditNotAllowed("id".into()), StatusCode::BAD_REQUEST),
            (ModelError::Integrity("owner".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (model, status) in cases {
            assert_eq!(AppError::from(model).status_code(), status);
        }
    }

    #[test]
    fn test_not_modified_has_no_body() {
        let response = AppError::NotModified.into_response();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(
            response
                .headers()
                .get(axum::http::header::CONTENT_TYPE),
            None
        );
    }

    #[test]
    fn test_invalid_token_is_unauthorized() {
        assert_eq!(
            AppError::from(IdentityError::InvalidToken).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }
}
