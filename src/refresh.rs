//! Single-flight token refresh
//!
//! However many requests hit a 401 at once, one `POST /auth/refresh` is made.
//! The first caller moves the coordinator from `Idle` to `Refreshing` and the
//! exchange runs on its own task; every caller, the first one included, waits on
//! a oneshot queued in arrival order. When the exchange finishes the queue is
//! drained front to back with the shared result and the state returns to `Idle`.

use crate::auth_client::AuthClient;
use crate::error::{ClientError, Result};
use crate::token_store::{Persistence, TokenStore};
use crate::types::{ExpiryReason, SessionEvent};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, oneshot};
use tracing::{debug, info, warn};

/// Why a refresh produced no token
///
/// Shared by every waiter, hence `Clone` and string-typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    NoRefreshToken,
    Rejected(String),
    /// The API could not be reached or failed server-side; the token may still be good.
    Unreachable(String),
    SessionEnded,
}

impl From<RefreshFailure> for ClientError {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::NoRefreshToken => ClientError::Unauthorized,
            RefreshFailure::Rejected(message) | RefreshFailure::Unreachable(message) => {
                ClientError::RefreshFailed(message)
            }
            RefreshFailure::SessionEnded => ClientError::SessionEnded,
        }
    }
}

type RefreshResult = std::result::Result<String, RefreshFailure>;

/// What started a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// A protected request got 401.
    Unauthorized,
    /// A persisted refresh token is exchanged at start-up.
    Resume,
}

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshResult>>,
    },
}

/// Coordinates token refreshes for one [`TokenStore`]
pub struct RefreshCoordinator<C: AuthClient> {
    inner: Arc<CoordinatorInner<C>>,
}

impl<C: AuthClient> Clone for RefreshCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CoordinatorInner<C> {
    auth_client: Arc<C>,
    token_store: TokenStore,
    state: Mutex<RefreshState>,
    events: broadcast::Sender<SessionEvent>,
}

impl<C: AuthClient> RefreshCoordinator<C> {
    pub fn new(
        auth_client: Arc<C>,
        token_store: TokenStore,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                auth_client,
                token_store,
                state: Mutex::new(RefreshState::Idle),
                events,
            }),
        }
    }

    /// Get a usable access token after `rejected_token` was answered with 401
    ///
    /// Returns immediately if the store already moved on to a different token.
    /// Otherwise joins the in-flight refresh or starts one. With no refresh token
    /// available the session is terminated without any network call.
    pub async fn refresh(&self, rejected_token: Option<&str>) -> Result<String> {
        let receiver = {
            let mut state = self.inner.state.lock().await;
            match &mut *state {
                RefreshState::Refreshing { waiters } => Self::enqueue(waiters),
                RefreshState::Idle => {
                    let (epoch, tokens) = self.inner.token_store.snapshot();

                    let Some(tokens) = tokens else {
                        debug!("Unauthorized without a session, nothing to refresh");
                        return Err(RefreshFailure::NoRefreshToken.into());
                    };

                    if rejected_token != Some(tokens.access_token.as_str()) {
                        debug!("Token already rotated, skipping refresh");
                        return Ok(tokens.access_token);
                    }

                    if tokens.refresh_token.is_empty() {
                        warn!("Unauthorized with no refresh token, ending session");
                        if self.inner.token_store.clear_tokens_if(epoch) {
                            self.inner.expire(ExpiryReason::NoRefreshToken);
                        }
                        return Err(RefreshFailure::NoRefreshToken.into());
                    }

                    self.start(&mut state, tokens.refresh_token, epoch, Trigger::Unauthorized)
                }
            }
        };

        Self::receive(receiver).await
    }

    /// Exchange a refresh token persisted by a previous run
    ///
    /// Shares the single-flight with [`RefreshCoordinator::refresh`]. The stored
    /// entry is only forgotten when the API rejects the token; transport errors
    /// and server faults leave it for the next attempt. If a session appeared in
    /// the meantime its token is returned instead.
    pub async fn resume(&self, refresh_token: String) -> Result<String> {
        let receiver = {
            let mut state = self.inner.state.lock().await;
            match &mut *state {
                RefreshState::Refreshing { waiters } => Self::enqueue(waiters),
                RefreshState::Idle => {
                    let (epoch, tokens) = self.inner.token_store.snapshot();
                    if let Some(tokens) = tokens {
                        debug!("Session already present, skipping resume");
                        return Ok(tokens.access_token);
                    }
                    self.start(&mut state, refresh_token, epoch, Trigger::Resume)
                }
            }
        };

        Self::receive(receiver).await
    }

    fn enqueue(waiters: &mut Vec<oneshot::Sender<RefreshResult>>) -> oneshot::Receiver<RefreshResult> {
        let (tx, rx) = oneshot::channel();
        waiters.push(tx);
        debug!(queued = waiters.len(), "Refresh in flight, queued request");
        rx
    }

    fn start(
        &self,
        state: &mut RefreshState,
        refresh_token: String,
        epoch: u64,
        trigger: Trigger,
    ) -> oneshot::Receiver<RefreshResult> {
        let (tx, rx) = oneshot::channel();
        *state = RefreshState::Refreshing { waiters: vec![tx] };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_refresh(refresh_token, epoch, trigger).await;
        });
        rx
    }

    async fn receive(receiver: oneshot::Receiver<RefreshResult>) -> Result<String> {
        match receiver.await {
            Ok(result) => result.map_err(ClientError::from),
            Err(_) => Err(ClientError::RefreshFailed("refresh task aborted".to_string())),
        }
    }

    /// Whether a refresh call is currently in flight
    pub async fn is_refreshing(&self) -> bool {
        matches!(*self.inner.state.lock().await, RefreshState::Refreshing { .. })
    }

    /// Number of requests waiting on the in-flight refresh
    pub async fn queued(&self) -> usize {
        match &*self.inner.state.lock().await {
            RefreshState::Refreshing { waiters } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }
}

impl<C: AuthClient> CoordinatorInner<C> {
    async fn run_refresh(&self, refresh_token: String, epoch: u64, trigger: Trigger) {
        debug!(epoch, ?trigger, "Starting token refresh");

        let result = match self.auth_client.refresh(&refresh_token).await {
            Ok(mut pair) => {
                if pair.refresh_token.is_empty() {
                    // Not rotated: the token we sent stays valid.
                    pair.refresh_token = refresh_token;
                }
                let access_token = pair.access_token.clone();
                match self.token_store.set_tokens_if(epoch, pair) {
                    Some(persistence) => {
                        if let Persistence::MemoryOnly(e) = &persistence {
                            debug!(error = %e, "Refreshed tokens kept in memory only");
                        }
                        info!("Access token refreshed successfully");
                        let _ = self.events.send(SessionEvent::Refreshed);
                        Ok(access_token)
                    }
                    None => {
                        debug!("Session changed during refresh, discarding result");
                        self.current_or_ended()
                    }
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, ?trigger, "Token refresh failed");
                match trigger {
                    Trigger::Unauthorized if self.token_store.clear_tokens_if(epoch) => {
                        self.expire(ExpiryReason::RefreshRejected(message.clone()));
                        Err(RefreshFailure::Rejected(message))
                    }
                    Trigger::Resume if !e.is_rejection() => {
                        debug!("Keeping persisted refresh token for a later attempt");
                        Err(RefreshFailure::Unreachable(message))
                    }
                    Trigger::Resume if self.token_store.forget_persisted_if(epoch) => {
                        self.expire(ExpiryReason::RefreshRejected(message.clone()));
                        Err(RefreshFailure::Rejected(message))
                    }
                    _ => {
                        debug!("Session changed during failed refresh, leaving it alone");
                        self.current_or_ended()
                    }
                }
            }
        };

        let waiters = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters } => waiters,
                RefreshState::Idle => Vec::new(),
            }
        };

        debug!(waiters = waiters.len(), "Releasing queued requests");
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    fn current_or_ended(&self) -> RefreshResult {
        self.token_store
            .access_token()
            .ok_or(RefreshFailure::SessionEnded)
    }

    fn expire(&self, reason: ExpiryReason) {
        let _ = self.events.send(SessionEvent::Expired { reason });
    }
}
