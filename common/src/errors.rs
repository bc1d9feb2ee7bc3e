//! Error types shared across the workspace.
//!
//! Every failure the gateway can surface is a variant of [`AppError`]. The
//! variant name doubles as the error category reported to clients when the
//! underlying message is empty.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::response::ApiResponse;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// No driver could be inferred for a connection URL.
    #[error("No suitable driver found for {0}")]
    DriverNotFound(String),

    #[error("Driver not available: {0}")]
    DriverNotAvailable(String),

    /// The plugin carrying `driver` needs a symbol no plugin provides.
    #[error("Driver {driver} is missing required dependencies. Missing symbol: {symbol}")]
    MissingDependency { driver: String, symbol: String },

    #[error("SSH tunnel failed: {0}")]
    TunnelFailed(String),

    #[error("{0}")]
    ConnectionFailed(String),

    #[error("Connection was established but is not valid: {0}")]
    ConnectionInvalid(String),

    #[error("Failed to build data source: {0}")]
    SessionBuildFailed(String),

    #[error("No active connection")]
    NoActiveSession,

    #[error("{0}")]
    QueryFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable category name, used as `errorType` and as the fallback message.
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "Validation",
            AppError::NotFound(_) => "NotFound",
            AppError::DriverNotFound(_) => "DriverNotFound",
            AppError::DriverNotAvailable(_) => "DriverNotAvailable",
            AppError::MissingDependency { .. } => "MissingDependency",
            AppError::TunnelFailed(_) => "TunnelFailed",
            AppError::ConnectionFailed(_) => "ConnectionFailed",
            AppError::ConnectionInvalid(_) => "ConnectionInvalid",
            AppError::SessionBuildFailed(_) => "SessionBuildFailed",
            AppError::NoActiveSession => "NoActiveSession",
            AppError::QueryFailed(_) => "QueryFailed",
            AppError::Io(_) => "Io",
            AppError::Internal(_) => "Internal",
        }
    }

    /// Error code for the API envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DriverNotFound(_) => "DRIVER_NOT_FOUND",
            AppError::DriverNotAvailable(_) => "DRIVER_NOT_AVAILABLE",
            AppError::MissingDependency { .. } => "MISSING_DEPENDENCY",
            AppError::TunnelFailed(_) => "TUNNEL_FAILED",
            AppError::ConnectionFailed(_) => "CONNECTION_FAILED",
            AppError::ConnectionInvalid(_) => "CONNECTION_INVALID",
            AppError::SessionBuildFailed(_) => "SESSION_BUILD_FAILED",
            AppError::NoActiveSession => "NO_ACTIVE_SESSION",
            AppError::QueryFailed(_) => "QUERY_FAILED",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DriverNotFound(_)
            | AppError::DriverNotAvailable(_)
            | AppError::MissingDependency { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NoActiveSession => StatusCode::CONFLICT,
            AppError::TunnelFailed(_)
            | AppError::ConnectionFailed(_)
            | AppError::ConnectionInvalid(_) => StatusCode::BAD_GATEWAY,
            AppError::SessionBuildFailed(_)
            | AppError::QueryFailed(_)
            | AppError::Io(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The display message, or the category when the message is blank.
    pub fn message_or_category(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            self.category().to_string()
        } else {
            message
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, category = self.category(), "Request failed");
        } else {
            tracing::warn!(error = %self, category = self.category(), "Request rejected");
        }

        let body = ApiResponse::err_with_details(
            self.code(),
            self.message_or_category(),
            json!({ "errorType": self.category() }),
        );
        (status, Json(body)).into_response()
    }
}
