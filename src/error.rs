//! Error taxonomy for the ingestion pipeline.
//!
//! Transient errors (network, timeout, upstream throttling, upstream 5xx) are
//! retried by the fetch layer. Everything else fails fast.

use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("network error: {0}")]
    Network(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("upstream returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] DbErr),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("source {source_name} already has run {run_id} in progress")]
    RunInProgress { source_name: String, run_id: String },
}

impl IngestError {
    /// Whether a fetch that failed with this error may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Network(_) | IngestError::Timeout(_) | IngestError::RateLimited(_) => {
                true
            }
            IngestError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IngestError::Timeout(err.to_string())
        } else if err.is_decode() {
            IngestError::Validation(format!("malformed response body: {}", err))
        } else if let Some(status) = err.status() {
            IngestError::HttpStatus {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            IngestError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(IngestError::Network("reset".into()).is_transient());
        assert!(IngestError::Timeout("30s".into()).is_transient());
        assert!(IngestError::RateLimited("429".into()).is_transient());
        assert!(
            IngestError::HttpStatus {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );

        assert!(
            !IngestError::HttpStatus {
                status: 404,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!IngestError::Validation("bad".into()).is_transient());
        assert!(!IngestError::Storage(DbErr::Custom("boom".into())).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = IngestError::Storage(DbErr::Custom("disk full".into()));
        assert!(err.to_string().contains("storage error"));
        assert!(err.to_string().contains("disk full"));
    }
}
