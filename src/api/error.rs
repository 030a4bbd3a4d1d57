use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::ai::{AiError, SummarizeError};
use crate::collect::SourceValidationError;
use crate::export::ExportError;
use crate::monitor::MonitorError;
use crate::settings::SettingsError;
use crate::storage::DatabaseError;

/// Error returned by handlers, rendered as `{"detail": "..."}`.
///
/// 404 means nothing matched, 4xx other than that means the request was
/// rejected without side effects, 5xx means the operation itself failed.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), detail = %self.detail, "Request failed");
        } else {
            tracing::debug!(status = self.status.as_u16(), detail = %self.detail, "Request rejected");
        }
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        // Storage details stay in the log
        tracing::error!(error = %e, "Storage error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Storage error")
    }
}

impl From<SourceValidationError> for ApiError {
    fn from(e: SourceValidationError) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl From<SettingsError> for ApiError {
    fn from(e: SettingsError) -> Self {
        match e {
            SettingsError::Storage(e) => e.into(),
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl From<AiError> for ApiError {
    fn from(e: AiError) -> Self {
        let status = match e {
            AiError::NotConfigured | AiError::InsecureBaseUrl => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.to_string())
    }
}

impl From<SummarizeError> for ApiError {
    fn from(e: SummarizeError) -> Self {
        match e {
            SummarizeError::NoArticles => Self::not_found(e.to_string()),
            SummarizeError::NotConfigured => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            SummarizeError::Ai(e) => e.into(),
            SummarizeError::Storage(e) => e.into(),
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::NothingToExport | ExportError::NotFound(_) => {
                Self::not_found(e.to_string())
            }
            ExportError::InvalidFilename(_) => Self::bad_request(e.to_string()),
            ExportError::Io(io) => {
                tracing::error!(error = %io, "Export file I/O failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Export file I/O failed")
            }
            ExportError::Storage(e) => e.into(),
        }
    }
}

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        match e {
            MonitorError::SourceNotFound(_) => Self::not_found(e.to_string()),
            MonitorError::Storage(e) => e.into(),
            MonitorError::PassFailed(_) | MonitorError::Aborted => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}
