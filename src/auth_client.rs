//! Calls against the API's `/auth` endpoints

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::types::*;
use reqwest::Client;
use std::future::Future;
use tracing::{debug, info};

/// Macro to turn a non-2xx response into `ClientError::Api`
///
/// Uses the `message` field of a JSON error body when there is one.
macro_rules! check_response {
    ($response:expr) => {
        if !$response.status().is_success() {
            let status = $response.status();
            let text = $response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.message)
                .unwrap_or(text);
            return Err(ClientError::Api { status, message });
        }
    };
}

/// Remote side of the token lifecycle
///
/// These endpoints sit on the exclusion list: they are called without a bearer
/// token and their failures are never fed back into the refresh logic.
pub trait AuthClient: Send + Sync + 'static {
    /// Exchange credentials for a token pair
    fn login(&self, credentials: &Credentials) -> impl Future<Output = Result<TokenPair>> + Send;

    /// Create an account and return its first token pair
    fn register(&self, registration: &Registration) -> impl Future<Output = Result<TokenPair>> + Send;

    /// Exchange a refresh token for a new pair
    fn refresh(&self, refresh_token: &str) -> impl Future<Output = Result<TokenPair>> + Send;

    /// Invalidate a refresh token server-side
    fn revoke(&self, refresh_token: &str) -> impl Future<Output = Result<()>> + Send;
}

/// HTTP implementation of [`AuthClient`]
#[derive(Clone)]
pub struct AuthClientHttp {
    config: ClientConfig,
    http_client: Client,
}

impl AuthClientHttp {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http_client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self::with_client(config, http_client))
    }

    /// Reuse an existing reqwest client (and its connection pool)
    pub fn with_client(config: ClientConfig, http_client: Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    async fn post_for_tokens<B: serde::Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<TokenPair> {
        let response = self
            .http_client
            .post(self.config.url(path))
            .json(body)
            .send()
            .await?;

        check_response!(response);

        let tokens: TokenResponse = response.json().await?;
        Ok(tokens.into())
    }
}

impl AuthClient for AuthClientHttp {
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair> {
        let tokens = self.post_for_tokens("/auth/login", credentials).await?;
        info!(email = %credentials.email, "Logged in");
        Ok(tokens)
    }

    async fn register(&self, registration: &Registration) -> Result<TokenPair> {
        let tokens = self.post_for_tokens("/auth/register", registration).await?;
        info!(username = %registration.username, "Registered new account");
        Ok(tokens)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let request = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        let tokens = self.post_for_tokens("/auth/refresh", &request).await?;
        debug!(expires_in_secs = tokens.expires_in_secs, "Refresh call succeeded");
        Ok(tokens)
    }

    async fn revoke(&self, refresh_token: &str) -> Result<()> {
        let request = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };

        let response = self
            .http_client
            .post(self.config.url("/auth/revoke"))
            .json(&request)
            .send()
            .await?;

        check_response!(response);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_body(access: &str, refresh: &str) -> serde_json::Value {
        serde_json::json!({ "accessToken": access, "refreshToken": refresh, "expiresIn": 1800 })
    }

    #[tokio::test]
    async fn test_refresh_sends_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(serde_json::json!({ "refreshToken": "refresh_1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access_2", "refresh_2")))
            .expect(1)
            .mount(&server)
            .await;

        let client = AuthClientHttp::new(ClientConfig::new(server.uri())).unwrap();
        let tokens = client.refresh("refresh_1").await.unwrap();

        assert_eq!(tokens.access_token, "access_2");
        assert_eq!(tokens.refresh_token, "refresh_2");
        assert_eq!(tokens.expires_in_secs, 1800);
    }

    #[tokio::test]
    async fn test_error_message_is_taken_from_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(serde_json::json!({ "message": "bad credentials" })),
            )
            .mount(&server)
            .await;

        let client = AuthClientHttp::new(ClientConfig::new(server.uri())).unwrap();
        let err = client
            .login(&Credentials {
                email: "fan@cadence.fm".to_string(),
                password: "wrong".to_string(),
            })
            .await
            .unwrap_err();

        match err {
            ClientError::Api { status, message } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(message, "bad credentials");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_register_posts_profile() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register"))
            .and(body_json(serde_json::json!({
                "username": "vinylhead",
                "email": "vinyl@cadence.fm",
                "password": "hunter22"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(token_body("access_1", "refresh_1")))
            .expect(1)
            .mount(&server)
            .await;

        let client = AuthClientHttp::new(ClientConfig::new(server.uri())).unwrap();
        let tokens = client
            .register(&Registration {
                username: "vinylhead".to_string(),
                email: "vinyl@cadence.fm".to_string(),
                password: "hunter22".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "access_1");
    }

    #[tokio::test]
    async fn test_revoke_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/revoke"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let client = AuthClientHttp::new(ClientConfig::new(server.uri())).unwrap();
        let err = client.revoke("refresh_1").await.unwrap_err();

        assert!(matches!(err, ClientError::Api { status, ref message } if status == StatusCode::INTERNAL_SERVER_ERROR && message == "oops"));
    }
}
