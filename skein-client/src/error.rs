//! Error types for the Skein clients

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the backend services
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The service answered with an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the service
        message: String,
    },

    /// Failed to parse a response body
    #[error("failed to parse response: {0}")]
    ParseError(String),

    /// No candidate baseurl answered the health probe
    #[error("no responsive backend among {0:?}")]
    NoBackendAvailable(Vec<String>),

    /// The client was constructed without the needed baseurls
    #[error("service not configured: {0}")]
    NotConfigured(&'static str),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// True for transient failures worth retrying: connect errors,
    /// timeouts, unreachable backends and 5xx responses. 4xx is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed(err) => {
                err.is_connect() || err.is_timeout() || err.is_request()
            }
            Self::ApiError { status, .. } => *status >= 500,
            Self::NoBackendAvailable(_) => true,
            Self::ParseError(_) | Self::NotConfigured(_) => false,
        }
    }
}
