//! Typed failures at the fetch and service boundaries.
//!
//! The fetch client never leaks transport errors: every `reqwest` failure
//! is classified into a [`FetchError`] before it leaves
//! [`upstream`](crate::upstream). The service layer wraps those, plus its
//! own lookup failures, in [`ServiceError`].

use thiserror::Error;

/// Failure of one logical upstream call (after retries).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Request timeout")]
    RequestTimeout,

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Upstream returned HTTP {status}")]
    UpstreamHttp { status: u16 },

    /// Rejected by the circuit breaker without any network I/O.
    #[error("Upstream unavailable: circuit breaker is open")]
    UpstreamUnavailable,

    #[error("Invalid upstream response: {message}")]
    InvalidResponse { message: String },
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        FetchError::Network {
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        FetchError::InvalidResponse {
            message: message.into(),
        }
    }

    /// True for failures another attempt may fix: connection-level errors
    /// and 5xx responses. Timeouts are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network { .. } => true,
            FetchError::UpstreamHttp { status } => *status >= 500,
            FetchError::RequestTimeout
            | FetchError::UpstreamUnavailable
            | FetchError::InvalidResponse { .. } => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::RequestTimeout
        } else if let Some(status) = err.status() {
            FetchError::UpstreamHttp {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            FetchError::invalid_response(err.to_string())
        } else if err.is_connect() {
            FetchError::network(format!("connection failed: {}", err))
        } else {
            FetchError::network("request to upstream failed")
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Quote not found: {0}")]
    NotFound(String),

    #[error("No quotes available")]
    NoQuotesAvailable,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::network("reset").is_retryable());
        assert!(FetchError::UpstreamHttp { status: 500 }.is_retryable());
        assert!(FetchError::UpstreamHttp { status: 503 }.is_retryable());
        assert!(!FetchError::UpstreamHttp { status: 404 }.is_retryable());
        assert!(!FetchError::UpstreamHttp { status: 429 }.is_retryable());
        assert!(!FetchError::RequestTimeout.is_retryable());
        assert!(!FetchError::UpstreamUnavailable.is_retryable());
        assert!(!FetchError::invalid_response("bad json").is_retryable());
    }

    #[test]
    fn test_messages() {
        assert_eq!(FetchError::RequestTimeout.to_string(), "Request timeout");
        assert_eq!(
            FetchError::UpstreamHttp { status: 404 }.to_string(),
            "Upstream returned HTTP 404"
        );
        let err: ServiceError = FetchError::UpstreamUnavailable.into();
        assert!(err.to_string().contains("circuit breaker"));
        assert_eq!(
            ServiceError::NotFound("abc".into()).to_string(),
            "Quote not found: abc"
        );
    }
}
