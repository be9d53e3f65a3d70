//! Error types for the authority client.

use reqwest::StatusCode;

/// Error types for authority requests and the state change feed
#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Authority returned {status}: {body}")]
    StatusError { status: StatusCode, body: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The upstream gateway timed out (HTTP 504). Retried after a fixed delay.
    #[error("Gateway timeout from authority")]
    GatewayTimeout,

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Invalid authority URL: {0}")]
    InvalidUrl(String),
}

impl AuthorityError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthorityError::HttpError(_)
            | AuthorityError::GatewayTimeout
            | AuthorityError::StreamError(_) => true,
            AuthorityError::StatusError { status, .. } => status.is_server_error(),
            AuthorityError::JsonError(_)
            | AuthorityError::NotFound(_)
            | AuthorityError::InvalidUrl(_) => false,
        }
    }

    pub fn is_gateway_timeout(&self) -> bool {
        matches!(self, AuthorityError::GatewayTimeout)
    }
}
