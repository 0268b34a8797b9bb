//! Application error taxonomy and its HTTP mapping.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::StoreError;
use crate::document::renderer::RenderError;
use crate::storage::StorageError;
use crate::template::compiler::CompileError;
use crate::ErrorResponse;

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or owned by someone else; both look the same from outside.
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Invalid template syntax: {0}")]
    InvalidTemplate(String),
    #[error("Rendering failed: {0}")]
    RenderFailure(String),
    #[error("Rendering timed out after {0:?}")]
    RenderTimeout(std::time::Duration),
    #[error("Storage failure: {0}")]
    StorageIo(String),
    #[error("Document file not found on server")]
    FileMissing,
    #[error("Account is locked until {}", .until.format("%Y-%m-%d %H:%M:%SZ"))]
    AccountLocked { until: DateTime<Utc> },
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::InvalidTemplate(_) => "InvalidTemplate",
            Self::RenderFailure(_) => "RenderFailure",
            Self::RenderTimeout(_) => "RenderTimeout",
            Self::StorageIo(_) => "StorageIOFailure",
            Self::FileMissing => "FileMissing",
            Self::AccountLocked { .. } => "AccountLocked",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::InvalidRefreshToken => "InvalidRefreshToken",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Validation(_) => "BadRequest",
            Self::Conflict(_) => "Conflict",
            Self::Store(_) | Self::Internal(_) => "InternalServerError",
        }
    }
}

impl From<CompileError> for AppError {
    fn from(err: CompileError) -> Self {
        Self::InvalidTemplate(err.to_string())
    }
}

impl From<RenderError> for AppError {
    fn from(err: RenderError) -> Self {
        Self::RenderFailure(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => Self::FileMissing,
            other => Self::StorageIo(other.to_string()),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTemplate(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RenderFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RenderTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::AccountLocked { .. } => StatusCode::LOCKED,
            Self::InvalidCredentials | Self::InvalidRefreshToken | Self::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::StorageIo(_) | Self::FileMissing | Self::Store(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            Self::StorageIo(_) | Self::Store(_) | Self::Internal(_) => {
                log::error!("Request failed: {}", self);
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = ErrorResponse::new(self.error_type(), &message);
        if let Self::AccountLocked { until } = self {
            body.locked_until = Some(until.to_rfc3339());
        }
        HttpResponse::build(self.status_code()).json(body)
    }
}
