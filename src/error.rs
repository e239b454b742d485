use thiserror::Error;

/// Crate-wide error type, split along the policy lines a job's outermost
/// function needs to decide retry/backoff behaviour on.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("backend error: {0}")]
    Transient(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("backend violated its own service info contract: {0}")]
    Validation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),
}

pub type Result<T> = std::result::Result<T, CollectorError>;
