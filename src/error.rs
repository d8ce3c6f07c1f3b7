use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Main error type for the service
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Invalid request: {0}")]
    #[diagnostic(code(calsync::validation))]
    Validation(String),

    #[error("Calendar fetch failed: {0}")]
    #[diagnostic(code(calsync::fetch))]
    Fetch(String),

    #[error("Event reconciliation failed: {0}")]
    #[diagnostic(code(calsync::reconcile))]
    Reconcile(String),

    #[error("Cache lookup failed: {0}")]
    #[diagnostic(code(calsync::lookup))]
    Lookup(String),

    #[error("Storage error: {0}")]
    #[diagnostic(code(calsync::storage))]
    Storage(String),

    #[error("Authentication error: {0}")]
    #[diagnostic(code(calsync::auth))]
    Auth(String),

    #[error("Environment error: {0}")]
    #[diagnostic(code(calsync::environment))]
    Environment(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(calsync::config))]
    Config(String),

    #[error(transparent)]
    #[diagnostic(code(calsync::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(calsync::serialization))]
    Serialization(String),

    #[error("Other error: {0}")]
    #[diagnostic(code(calsync::other))]
    Other(String),
}

impl Error {
    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Fetch(_) => "fetch",
            Error::Reconcile(_) => "reconcile",
            Error::Lookup(_) => "lookup",
            Error::Storage(_) => "storage",
            Error::Auth(_) => "auth",
            Error::Environment(_) => "environment",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Other(_) => "other",
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Type alias for Result with our Error type
pub type SyncResult<T> = Result<T, Error>;

/// Helper to create environment errors
pub fn env_error(var: &str) -> Error {
    Error::Environment(format!("Missing environment variable: {}", var))
}

/// Helper to create configuration errors
pub fn config_error(message: &str) -> Error {
    Error::Config(message.to_string())
}

/// Helper to create validation errors
pub fn validation_error(message: &str) -> Error {
    Error::Validation(message.to_string())
}

/// Helper to create fetch errors
pub fn fetch_error(message: &str) -> Error {
    Error::Fetch(message.to_string())
}

/// Helper to create reconcile errors
pub fn reconcile_error(message: &str) -> Error {
    Error::Reconcile(message.to_string())
}

/// Helper to create lookup errors
pub fn lookup_error(message: &str) -> Error {
    Error::Lookup(message.to_string())
}

/// Helper to create storage errors
pub fn storage_error(message: &str) -> Error {
    Error::Storage(message.to_string())
}

/// Helper to create authentication errors
pub fn auth_error(message: &str) -> Error {
    Error::Auth(message.to_string())
}

/// Helper to create other errors
pub fn other_error(message: &str) -> Error {
    Error::Other(message.to_string())
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(msg) => {
                warn!("Rejected request: {}", msg);
                StatusCode::BAD_REQUEST
            }
            Error::Auth(msg) => {
                warn!("Authentication failure: {}", msg);
                StatusCode::UNAUTHORIZED
            }
            other => {
                error!("Request failed: {:?}", other);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorResponse {
            error: self.kind().to_string(),
            details: Some(self.to_string()),
        });

        (status, body).into_response()
    }
}
