//! Error types for the Cadence client

use reqwest::StatusCode;
use thiserror::Error;

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("API call failed with status {status}: {message}")]
    Api { status: StatusCode, message: String },

    /// A protected request was rejected and there was no refresh token to recover with.
    #[error("Unauthorized: session is not authenticated")]
    Unauthorized,

    /// The refresh call itself failed; replaces the original 401 for every waiting request.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Tokens were cleared (logout) while a refresh was in flight.
    #[error("Session ended while the request was waiting for a token refresh")]
    SessionEnded,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether this error means the session is gone and the user has to sign in again.
    pub fn is_session_terminal(&self) -> bool {
        matches!(
            self,
            ClientError::Unauthorized | ClientError::RefreshFailed(_) | ClientError::SessionEnded
        )
    }

    /// Whether the API answered and refused the request (4xx).
    ///
    /// Transport failures and 5xx answers say nothing about the credentials sent.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ClientError::Api { status, .. } if status.is_client_error())
    }
}

impl From<config::ConfigError> for ClientError {
    fn from(e: config::ConfigError) -> Self {
        ClientError::Configuration(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
