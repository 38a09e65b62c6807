use thiserror::Error;

/// Process-wide error type. Handler code maps these onto the HTTP surface in
/// `proxy::common::errors`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("service unavailable: no accounts configured")]
    NoAccounts,

    #[error("timed out waiting for an available account")]
    AcquireTimeout,

    #[error("all accounts are over quota or invalid")]
    QuotaExhausted,

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("{0}")]
    Unknown(String),
}

pub type AppResult<T> = Result<T, AppError>;
