//! Type definitions for authentication

use serde::{Deserialize, Serialize};

/// Access + refresh token pair.
///
/// Always handled as a unit: the store holds `Option<TokenPair>`, so either both
/// tokens are present or neither is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_secs: u64,
}

impl From<TokenResponse> for TokenPair {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in_secs: response.expires_in,
        }
    }
}

/// Body of `POST /auth/refresh` and `POST /auth/revoke`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Token response shared by login, register and refresh
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    /// Missing when the API does not issue refresh tokens
    #[serde(default)]
    pub refresh_token: String,
    pub expires_in: u64,
}

/// Body of `POST /auth/login`
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Body of `POST /auth/register`
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Error body the API may attach to non-2xx responses
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: String,
}

/// Why a session was terminated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryReason {
    /// A request got 401 and there was no refresh token.
    NoRefreshToken,
    /// The refresh call failed or the refresh token was rejected.
    RefreshRejected(String),
}

/// Session lifecycle notifications.
///
/// `Expired` is the "must re-authenticate" signal: the router decides where to go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    Refreshed,
    SignedOut,
    Expired { reason: ExpiryReason },
}
