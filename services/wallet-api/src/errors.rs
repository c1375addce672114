use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use ledger_core::ErrorKind;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] ledger_core::Error),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Service unavailable")]
    ServiceUnavailable,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl ApiError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Ledger(err) => err.code(),
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message shown to the caller; infrastructure details stay in the logs
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Ledger(err) if err.kind() == ErrorKind::Infrastructure => match err.code() {
                "TRANSACTION_FAILED" => "Transaction failed".to_string(),
                "DATABASE_CONNECTION" => "Database connection error".to_string(),
                _ => "Internal server error".to_string(),
            },
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn log(&self) {
        if self.status_code().is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::warn!(code = self.code(), error = %self, "Request rejected");
        }
    }

    pub fn body(&self) -> serde_json::Value {
        json!({
            "error": self.public_message(),
            "code": self.code(),
        })
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        self.log();
        HttpResponse::build(self.status_code()).json(self.body())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Ledger(err) => StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
