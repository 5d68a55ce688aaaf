//! Client error types.

use thiserror::Error;

/// Errors that can occur when talking to the content server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Authentication failed (missing or invalid API key).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    /// The configured base URL cannot carry a request path.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),
}

impl ClientError {
    /// Returns `true` if repeating the request cannot help.
    pub fn is_permanent(&self) -> bool {
        match self {
            ClientError::AuthenticationFailed(_)
            | ClientError::NotFound(_)
            | ClientError::InvalidResponse { .. }
            | ClientError::InvalidUrl(_) => true,
            ClientError::ApiError { status, .. } => (400..500).contains(status) && *status != 429,
            ClientError::Timeout(_) | ClientError::NetworkError(_) => false,
        }
    }
}
