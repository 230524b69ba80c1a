use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("File too large: the upload exceeds the limit of {limit}MB")]
    FileTooLarge { limit: usize },

    #[error("{message}")]
    ValidationError { message: String },

    #[error("{message}")]
    ProcessingError { message: String },

    #[error("Unsupported: {feature}")]
    Unsupported { feature: String },

    #[error("{message}")]
    NotFound {
        message: String,
        /// Page of the tool that produced the missing result, when known.
        redirect: Option<String>,
    },

    #[error("No files uploaded")]
    MissingFile,

    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl AppError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            AppError::ValidationError { .. } => "VALIDATION_ERROR",
            AppError::ProcessingError { .. } => "PROCESSING_ERROR",
            AppError::Unsupported { .. } => "UNSUPPORTED",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::MissingFile => "MISSING_FILE",
            AppError::Internal { .. } => "INTERNAL_ERROR",
            AppError::ConfigError { .. } => "CONFIG_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            AppError::ProcessingError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::MissingFile => StatusCode::BAD_REQUEST,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConfigError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client errors are the caller's fault; everything else is ours.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();
        let request_id = Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().to_rfc3339();
        let redirect = match &self {
            AppError::NotFound { redirect, .. } => redirect.clone(),
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!(
                error_code = error_code,
                status_code = %status,
                request_id = %request_id,
                error_message = %message,
                "API error occurred"
            );
        } else {
            tracing::warn!(
                error_code = error_code,
                status_code = %status,
                request_id = %request_id,
                error_message = %message,
                "Request rejected"
            );
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "code": error_code,
                "message": message,
                "request_id": request_id,
                "timestamp": timestamp,
                "redirect": redirect
            },
            "data": null
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::ProcessingError {
            message: format!("IO error: {}", err),
        }
    }
}

impl From<lopdf::Error> for AppError {
    fn from(err: lopdf::Error) -> Self {
        AppError::ProcessingError {
            message: format!("Error processing PDF file: {}", err),
        }
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        AppError::ProcessingError {
            message: format!("Error creating ZIP file: {}", err),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ValidationError {
            message: format!("JSON parsing error: {}", err),
        }
    }
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::ValidationError {
            message: message.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        AppError::ProcessingError {
            message: message.into(),
        }
    }

    pub fn unsupported(feature: impl Into<String>) -> Self {
        AppError::Unsupported {
            feature: feature.into(),
        }
    }

    pub fn not_found(redirect: Option<String>) -> Self {
        AppError::NotFound {
            message: "File not found or has expired.".to_string(),
            redirect,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        AppError::ConfigError {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal {
            message: message.into(),
        }
    }
}
