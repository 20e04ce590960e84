use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

use crate::accrual::AccrualError;
use crate::ledger::LedgerError;
use crate::orders::OrderNumberError;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Accrual service error: {0}")]
    Accrual(#[from] AccrualError),

    #[error("Invalid order number: {0}")]
    OrderNumber(#[from] OrderNumberError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid login or password")]
    InvalidCredentials,

    #[error("Login already in use: {0}")]
    LoginTaken(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::OrderNumber(OrderNumberError::Checksum(number)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_ORDER_NUMBER",
                format!("Order number {} failed the checksum", number),
                None,
            ),
            AppError::OrderNumber(e) => (
                StatusCode::BAD_REQUEST,
                "MALFORMED_ORDER_NUMBER",
                e.to_string(),
                None,
            ),
            AppError::InvalidInput(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg, None)
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None),
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid login or password".to_string(),
                None,
            ),
            AppError::LoginTaken(login) => (
                StatusCode::CONFLICT,
                "LOGIN_TAKEN",
                "User already exists with the given login".to_string(),
                Some(serde_json::json!({ "login": login })),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            AppError::Ledger(LedgerError::Duplicate(key)) => (
                StatusCode::CONFLICT,
                "DUPLICATE_RECORD",
                format!("Record already exists: {}", key),
                None,
            ),
            AppError::Ledger(LedgerError::NotFound(key)) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Record not found: {}", key),
                None,
            ),
            AppError::InsufficientFunds { required, available } => (
                StatusCode::PAYMENT_REQUIRED,
                "INSUFFICIENT_FUNDS",
                "Insufficient funds".to_string(),
                Some(serde_json::json!({
                    "required": required,
                    "available": available,
                })),
            ),
            AppError::Database(_) | AppError::Ledger(LedgerError::Database(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::Accrual(AccrualError::Transport(error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        AppError::Unauthorized(format!("Invalid token: {}", error))
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("Password hashing failed: {}", error))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(error: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Background task failed: {}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
