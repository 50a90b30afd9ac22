mod ingest;
mod token;

pub use ingest::IngestClient;
pub use token::{DEFAULT_TOKEN_URL, TokenError, TokenSource};

use async_trait::async_trait;
use http::StatusCode;
use thiserror::Error;

use crate::batch::EventBatch;
use crate::http::HttpError;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("request was rate limited")]
    RateLimited,
    #[error("server error: {status}")]
    Server { status: StatusCode },
    #[error("client error: {status}")]
    Client { status: StatusCode },
    #[error("request failed: {0}")]
    Transport(#[from] HttpError),
    #[error("failed to acquire access token: {0}")]
    Token(#[from] TokenError),
    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("delivery task aborted")]
    Aborted,
}

impl DeliveryError {
    /// Classify an ingest response status. `None` means delivered.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        if status.is_success() {
            None
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Some(DeliveryError::RateLimited)
        } else if status.is_server_error() {
            Some(DeliveryError::Server { status })
        } else {
            Some(DeliveryError::Client { status })
        }
    }

    /// Whether the failure is transient and worth another attempt.
    /// Client errors are permanent rejections, retrying them only burns
    /// the budget against an endpoint that will keep refusing.
    pub fn is_retriable(&self) -> bool {
        match self {
            DeliveryError::RateLimited => true,
            DeliveryError::Server { .. } => true,
            DeliveryError::Client { .. } => false,
            DeliveryError::Transport(_) => true,
            DeliveryError::Token(err) => err.is_retriable(),
            DeliveryError::Encode(_) => false,
            DeliveryError::Aborted => false,
        }
    }
}

/// The collaborator that posts one sealed batch to the ingest endpoint.
///
/// Implementations must not retry internally, retry belongs to the
/// writer so there is exactly one backoff layer.
#[async_trait]
pub trait DeliveryService: Send + Sync + 'static {
    async fn deliver(&self, batch: &EventBatch) -> Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_status() {
        assert!(DeliveryError::from_status(StatusCode::OK).is_none());
        assert!(DeliveryError::from_status(StatusCode::NO_CONTENT).is_none());

        let err = DeliveryError::from_status(StatusCode::TOO_MANY_REQUESTS).unwrap();
        assert!(matches!(err, DeliveryError::RateLimited));
        assert!(err.is_retriable());

        let err = DeliveryError::from_status(StatusCode::SERVICE_UNAVAILABLE).unwrap();
        assert!(matches!(err, DeliveryError::Server { .. }));
        assert!(err.is_retriable());

        let err = DeliveryError::from_status(StatusCode::BAD_REQUEST).unwrap();
        assert!(matches!(err, DeliveryError::Client { .. }));
        assert!(!err.is_retriable());
    }
}
