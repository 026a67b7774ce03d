//! Session facade wiring the store, coordinator, interceptor and guards

use crate::auth_client::{AuthClient, AuthClientHttp};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::guards::AuthGuards;
use crate::interceptor::{ExclusionList, Interceptor};
use crate::refresh::RefreshCoordinator;
use crate::storage::TokenStorage;
use crate::token_store::{Persistence, Restored, TokenStore};
use crate::types::{Credentials, Registration, SessionEvent};
use reqwest::{Client, Method, RequestBuilder, Response};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// A signed-in (or signed-out) user's connection to the API
pub struct Session<C: AuthClient = AuthClientHttp> {
    config: ClientConfig,
    http_client: Client,
    token_store: TokenStore,
    auth_client: Arc<C>,
    coordinator: RefreshCoordinator<C>,
    interceptor: Interceptor<C>,
    guards: AuthGuards,
    events: broadcast::Sender<SessionEvent>,
}

impl Session<AuthClientHttp> {
    /// Create a session talking to `config.base_url` over HTTP
    pub fn new(config: ClientConfig, storage: Arc<dyn TokenStorage>) -> Result<Self> {
        let http_client = Client::builder().timeout(config.request_timeout()).build()?;
        let auth_client = AuthClientHttp::with_client(config.clone(), http_client.clone());
        Self::with_auth_client(config, storage, auth_client, http_client)
    }
}

impl<C: AuthClient> Session<C> {
    /// Create a session with a custom [`AuthClient`]
    pub fn with_auth_client(
        config: ClientConfig,
        storage: Arc<dyn TokenStorage>,
        auth_client: C,
        http_client: Client,
    ) -> Result<Self> {
        let exclusions = ExclusionList::from_config(&config)?;
        let token_store = TokenStore::new(storage, &config);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let auth_client = Arc::new(auth_client);

        let coordinator = RefreshCoordinator::new(
            Arc::clone(&auth_client),
            token_store.clone(),
            events.clone(),
        );
        let interceptor = Interceptor::new(
            http_client.clone(),
            token_store.clone(),
            coordinator.clone(),
            exclusions,
        );
        let guards = AuthGuards::new(token_store.clone(), config.routes.clone());

        Ok(Self {
            config,
            http_client,
            token_store,
            auth_client,
            coordinator,
            interceptor,
            guards,
            events,
        })
    }

    /// Pick up the session persisted by a previous run
    ///
    /// A lone refresh token is exchanged right away through the refresh
    /// coordinator. It stays persisted unless the API rejects it, so a network
    /// blip at start-up does not sign the user out. Returns whether the session
    /// ended up authenticated.
    pub async fn resume(&self) -> bool {
        match self.token_store.restore() {
            Restored::Pair => {
                info!("Resumed persisted session");
                self.notify(SessionEvent::SignedIn);
                true
            }
            Restored::RefreshOnly(refresh_token) => match self.coordinator.resume(refresh_token).await {
                Ok(_) => {
                    info!("Resumed persisted session with a refreshed access token");
                    self.notify(SessionEvent::SignedIn);
                    true
                }
                Err(e) => {
                    warn!(error = %e, "Could not resume persisted session");
                    false
                }
            },
            Restored::Empty | Restored::Unavailable(_) => false,
        }
    }

    /// Sign in and store the returned token pair
    pub async fn login(&self, credentials: &Credentials) -> Result<Persistence> {
        let pair = self.auth_client.login(credentials).await?;
        let persistence = self.token_store.set_tokens(pair);
        self.notify(SessionEvent::SignedIn);
        Ok(persistence)
    }

    /// Create an account and sign in with it
    pub async fn register(&self, registration: &Registration) -> Result<Persistence> {
        let pair = self.auth_client.register(registration).await?;
        let persistence = self.token_store.set_tokens(pair);
        self.notify(SessionEvent::SignedIn);
        Ok(persistence)
    }

    /// Sign out locally, then revoke the refresh token on a best-effort basis
    ///
    /// Revocation failures are logged and never keep the tokens alive.
    pub async fn logout(&self) -> Persistence {
        let refresh_token = self.token_store.refresh_token();
        let persistence = self.token_store.clear_tokens();
        self.notify(SessionEvent::SignedOut);

        if let Some(refresh_token) = refresh_token {
            if let Err(e) = self.auth_client.revoke(&refresh_token).await {
                warn!(error = %e, "Refresh token revocation failed");
            }
        }

        info!("Logged out");
        persistence
    }

    /// Start building a request against an API path
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client.request(method, self.config.url(path))
    }

    /// Send a request through the interceptor
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.interceptor.send(request.build()?).await
    }

    /// Subscribe to session lifecycle events
    ///
    /// `SessionEvent::Expired` is the cue to navigate to a guest route.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.token_store
    }

    pub fn guards(&self) -> &AuthGuards {
        &self.guards
    }

    pub fn is_authenticated(&self) -> bool {
        self.token_store.is_authenticated()
    }

    fn notify(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
