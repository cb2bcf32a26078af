//! Error types for the scanhook core library.

use thiserror::Error;

/// Core error type for the scanhook orchestrator.
#[derive(Error, Debug)]
pub enum ScanhookError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("execution backend failure: {0}")]
    BackendFailure(String),

    #[error("key rejected: {0}")]
    KeyRejected(String),

    #[error("queue stopped")]
    QueueStopped,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cron expression error: {0}")]
    Cron(String),
}

/// Result type alias for scanhook operations.
pub type Result<T> = std::result::Result<T, ScanhookError>;
