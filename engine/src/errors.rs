//! Error types for the deployment engine

use thiserror::Error;

/// A failed call against a remote control plane
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{op} failed (status {}): {message}", display_status(.status))]
pub struct ApiError {
    /// Name of the remote operation, e.g. `b2_get_upload_url`
    pub op: String,

    /// HTTP status when the remote answered
    pub status: Option<u16>,

    /// Response body or transport error text
    pub message: String,
}

fn display_status(status: &Option<u16>) -> String {
    status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string())
}

impl ApiError {
    pub fn new(op: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            status,
            message: message.into(),
        }
    }

    /// Wrap a transport failure
    pub fn transport(op: impl Into<String>, err: &reqwest::Error) -> Self {
        Self::new(op, err.status().map(|s| s.as_u16()), err.to_string())
    }
}

/// Main error type for the deployment engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("object storage: {0}")]
    Storage(ApiError),

    #[error("edge: {0}")]
    Edge(ApiError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("deployment not found or not running: {0}")]
    NotRunning(String),

    #[error("deployment canceled")]
    Canceled,

    #[error("git clone failed: {0}")]
    Clone(String),

    #[error("{0}")]
    Build(String),

    #[error("{action} failed for {path}: {source}")]
    Upload {
        action: &'static str,
        path: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("routing update failed: {0}")]
    Routing(#[source] Box<EngineError>),

    #[error("failed to delete files: {failed} object(s) not removed, first error: {first}")]
    Purge { failed: usize, first: String },

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True if a canceled token ended the work that produced this error
    pub fn is_canceled(&self) -> bool {
        match self {
            EngineError::Canceled => true,
            EngineError::Upload { source, .. } | EngineError::Routing(source) => source.is_canceled(),
            _ => false,
        }
    }

    /// Short machine-readable code for callers
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not-found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::NotRunning(_) => "not-running",
            EngineError::Canceled => "canceled",
            EngineError::RateLimited(_) => "rate-limited",
            EngineError::Config(_) => "config",
            _ => "external-service",
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}
