use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::payment::PaymentError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("A job is already in progress for this session")]
    JobInProgress,

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Payment failed: {0}")]
    Payment(#[from] PaymentError),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Job not found")]
    JobNotFound,

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::Migration(_) => "database_error",
            AppError::Auth(_) => "unauthenticated",
            AppError::Validation(_) => "validation_error",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidFile(_) => "invalid_file",
            AppError::QuotaExceeded(_) => "quota_exceeded",
            AppError::JobInProgress => "job_in_progress",
            AppError::ProcessingFailed(_) => "processing_failed",
            AppError::Payment(_) => "payment_error",
            AppError::Cancelled => "cancelled",
            AppError::JobNotFound => "job_not_found",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let message = self.to_string();
        let (status, error_message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Migration(ref e) => {
                tracing::error!("Migration error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::InvalidFile(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::QuotaExceeded(msg) => (StatusCode::PAYMENT_REQUIRED, msg),
            AppError::JobInProgress => (StatusCode::CONFLICT, message),
            AppError::ProcessingFailed(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Payment(PaymentError::UnknownPlan(_)) | AppError::Payment(PaymentError::NotPurchasable(_)) => {
                (StatusCode::BAD_REQUEST, message)
            }
            AppError::Payment(PaymentError::Gateway(ref e)) => {
                tracing::error!("Payment gateway error: {}", e);
                (StatusCode::BAD_GATEWAY, message)
            }
            AppError::Payment(PaymentError::Declined(_)) => (StatusCode::PAYMENT_REQUIRED, message),
            AppError::Cancelled => (StatusCode::GONE, message),
            AppError::JobNotFound => (StatusCode::NOT_FOUND, message),
            AppError::InvalidTransition(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(ref e) => {
                tracing::error!("Internal error: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
