//! Bearer-token decoration and refresh-on-401 for outgoing requests

use crate::auth_client::AuthClient;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::refresh::RefreshCoordinator;
use crate::token_store::TokenStore;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Client, Request, Response, StatusCode, Url};
use tracing::{debug, warn};

/// Paths that never receive a bearer token and never trigger a refresh
///
/// A path matches exactly or as a prefix followed by `/`. Entries are resolved
/// against the path of the configured base URL, so `/auth/login` also covers
/// `https://host/api/auth/login` when the base URL is `https://host/api`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionList {
    paths: Vec<String>,
}

impl ExclusionList {
    pub fn new(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| ClientError::Configuration(format!("invalid base_url: {e}")))?;
        let prefix = base.path().trim_end_matches('/');

        Ok(Self::new(
            config
                .excluded_endpoints
                .iter()
                .map(|path| format!("{prefix}{path}")),
        ))
    }

    pub fn is_excluded(&self, url: &Url) -> bool {
        let path = url.path();
        self.paths.iter().any(|excluded| {
            path == excluded
                || path
                    .strip_prefix(excluded.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// Sends requests with the current bearer token and recovers from expired ones
pub struct Interceptor<C: AuthClient> {
    http_client: Client,
    token_store: TokenStore,
    coordinator: RefreshCoordinator<C>,
    exclusions: ExclusionList,
}

impl<C: AuthClient> Interceptor<C> {
    pub fn new(
        http_client: Client,
        token_store: TokenStore,
        coordinator: RefreshCoordinator<C>,
        exclusions: ExclusionList,
    ) -> Self {
        Self {
            http_client,
            token_store,
            coordinator,
            exclusions,
        }
    }

    pub fn exclusions(&self) -> &ExclusionList {
        &self.exclusions
    }

    /// Execute `request`, retrying it at most once after a token refresh
    ///
    /// - Excluded endpoints go out untouched and their responses, 401 included,
    ///   come straight back.
    /// - A 401 on any other request asks the coordinator for a fresh token and
    ///   replays the request with it. A 401 on the replay is returned as-is.
    /// - If no refresh token exists the result is `ClientError::Unauthorized`;
    ///   if the refresh call fails it is `ClientError::RefreshFailed`. In both
    ///   cases the tokens are already cleared and `SessionEvent::Expired` sent.
    pub async fn send(&self, request: Request) -> Result<Response> {
        if self.exclusions.is_excluded(request.url()) {
            debug!(url = %request.url(), "Excluded endpoint, sending without credentials");
            return Ok(self.http_client.execute(request).await?);
        }

        let token = self.token_store.access_token();
        let replay = request.try_clone();

        let response = self
            .http_client
            .execute(with_bearer(request, token.as_deref())?)
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(url = %response.url(), "Request unauthorized, refreshing access token");
        let fresh_token = self.coordinator.refresh(token.as_deref()).await?;

        let Some(replay) = replay else {
            warn!(url = %response.url(), "Request body cannot be replayed, returning the 401");
            return Ok(response);
        };

        debug!(url = %replay.url(), "Retrying request with refreshed token");
        Ok(self
            .http_client
            .execute(with_bearer(replay, Some(&fresh_token))?)
            .await?)
    }
}

fn with_bearer(mut request: Request, token: Option<&str>) -> Result<Request> {
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ClientError::Configuration(format!("access token is not a valid header: {e}")))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}
