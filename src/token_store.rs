//! Single source of truth for the current token pair
//!
//! The in-memory value lives in a `tokio::sync::watch` channel: readers never touch
//! storage, and subscribers see the latest value as soon as a write returns.
//! Every write is mirrored to a [`TokenStorage`] collaborator. Writers are
//! serialized, so the durable copy sees changes in the same order as memory.

use crate::config::{ClientConfig, CookieConfig};
use crate::storage::{
    ACCESS_TOKEN_KEY, MemoryStorage, REFRESH_TOKEN_KEY, StorageError, StoredEntry, TokenStorage,
};
use crate::types::TokenPair;
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
struct Snapshot {
    /// Bumped on every change of `pair`
    epoch: u64,
    pair: Option<TokenPair>,
}

/// Outcome of a write against durable storage
///
/// Storage faults never fail a write: the in-memory value is updated regardless
/// and the fault is handed back as a soft warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    Durable,
    MemoryOnly(StorageError),
}

impl Persistence {
    pub fn is_durable(&self) -> bool {
        matches!(self, Persistence::Durable)
    }

    pub fn warning(&self) -> Option<&StorageError> {
        match self {
            Persistence::Durable => None,
            Persistence::MemoryOnly(e) => Some(e),
        }
    }

    fn from_result(result: Result<(), StorageError>) -> Self {
        match result {
            Ok(()) => Persistence::Durable,
            Err(e) => {
                warn!(error = %e, "Token storage unavailable, continuing in memory only");
                Persistence::MemoryOnly(e)
            }
        }
    }
}

/// What [`TokenStore::restore`] found in storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restored {
    /// Both entries were present; the store is authenticated.
    Pair,
    /// Only the refresh token survived; it has to be exchanged before use.
    RefreshOnly(String),
    /// Nothing usable was stored.
    Empty,
    /// Storage could not be read; the store stays empty.
    Unavailable(StorageError),
}

/// Token store shared by the interceptor, the refresh coordinator and the guards
///
/// Cloning is cheap and every clone sees the same state.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: watch::Sender<Snapshot>,
    write_lock: Mutex<()>,
    storage: Arc<dyn TokenStorage>,
    cookie: CookieConfig,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenStore {
    /// Create an empty store persisting through `storage`
    pub fn new(storage: Arc<dyn TokenStorage>, config: &ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: watch::Sender::new(Snapshot::default()),
                write_lock: Mutex::new(()),
                storage,
                cookie: config.cookie.clone(),
                access_ttl: config.access_token_ttl(),
                refresh_ttl: config.refresh_token_ttl(),
            }),
        }
    }

    /// Create an empty store backed by process memory only
    pub fn in_memory(config: &ClientConfig) -> Self {
        Self::new(Arc::new(MemoryStorage::new()), config)
    }

    /// Current access token, read from memory
    pub fn access_token(&self) -> Option<String> {
        self.inner
            .state
            .borrow()
            .pair
            .as_ref()
            .map(|pair| pair.access_token.clone())
    }

    /// Current refresh token, read from memory
    ///
    /// An empty refresh token (the API omitted it) counts as absent.
    pub fn refresh_token(&self) -> Option<String> {
        self.inner
            .state
            .borrow()
            .pair
            .as_ref()
            .map(|pair| pair.refresh_token.clone())
            .filter(|token| !token.is_empty())
    }

    /// Current token pair
    pub fn tokens(&self) -> Option<TokenPair> {
        self.inner.state.borrow().pair.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().pair.is_some()
    }

    /// Version of the stored pair; changes on every set and on every effective clear
    pub fn epoch(&self) -> u64 {
        self.inner.state.borrow().epoch
    }

    /// Epoch and pair read together, so one can never belong to a different session than the other
    pub(crate) fn snapshot(&self) -> (u64, Option<TokenPair>) {
        let snapshot = self.inner.state.borrow();
        (snapshot.epoch, snapshot.pair.clone())
    }

    /// Replace the pair, persisting both tokens with their own expiry
    pub fn set_tokens(&self, pair: TokenPair) -> Persistence {
        let _writer = self.writer();
        self.inner.state.send_modify(|snapshot| {
            snapshot.epoch += 1;
            snapshot.pair = Some(pair.clone());
        });
        Persistence::from_result(self.persist(&pair))
    }

    /// Replace the pair only if nothing changed since `epoch` was read
    ///
    /// Returns `None` and leaves the store untouched when the epoch moved.
    pub(crate) fn set_tokens_if(&self, epoch: u64, pair: TokenPair) -> Option<Persistence> {
        let _writer = self.writer();
        let applied = self.inner.state.send_if_modified(|snapshot| {
            if snapshot.epoch != epoch {
                return false;
            }
            snapshot.epoch += 1;
            snapshot.pair = Some(pair.clone());
            true
        });
        applied.then(|| Persistence::from_result(self.persist(&pair)))
    }

    /// Drop the pair from memory and storage. Idempotent.
    pub fn clear_tokens(&self) -> Persistence {
        let _writer = self.writer();
        self.inner.state.send_if_modified(Self::clear_snapshot);
        Persistence::from_result(self.erase())
    }

    /// Clear only if nothing changed since `epoch` was read; returns whether it cleared
    pub(crate) fn clear_tokens_if(&self, epoch: u64) -> bool {
        let _writer = self.writer();
        let cleared = self
            .inner
            .state
            .send_if_modified(|snapshot| snapshot.epoch == epoch && Self::clear_snapshot(snapshot));
        if cleared {
            Persistence::from_result(self.erase());
        }
        cleared
    }

    /// Remove persisted entries left over from a previous run
    ///
    /// Only acts while the store is still empty at `epoch`, so a session created
    /// in the meantime keeps its entries.
    pub(crate) fn forget_persisted_if(&self, epoch: u64) -> bool {
        let _writer = self.writer();
        let untouched = {
            let snapshot = self.inner.state.borrow();
            snapshot.epoch == epoch && snapshot.pair.is_none()
        };
        if untouched {
            Persistence::from_result(self.erase());
        }
        untouched
    }

    /// Subscribe to access token changes
    pub fn subscribe(&self) -> TokenWatch {
        TokenWatch {
            rx: self.inner.state.subscribe(),
        }
    }

    /// Load the pair persisted by a previous run
    ///
    /// Memory only ever receives a complete pair. A surviving refresh token without
    /// its access token is reported back for the caller to exchange and stays
    /// persisted until the exchange settles. A lone access token is removed.
    pub fn restore(&self) -> Restored {
        let _writer = self.writer();
        let read = |key: &str| self.inner.storage.get(key);

        let (access, refresh) = match (read(ACCESS_TOKEN_KEY), read(REFRESH_TOKEN_KEY)) {
            (Ok(access), Ok(refresh)) => (access, refresh),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Could not read persisted tokens");
                return Restored::Unavailable(e);
            }
        };

        match (access, refresh) {
            (Some(access), Some(refresh)) => {
                let remaining = (access.expires_at - Utc::now()).num_seconds().max(0) as u64;
                self.inner.state.send_modify(|snapshot| {
                    snapshot.epoch += 1;
                    snapshot.pair = Some(TokenPair {
                        access_token: access.value,
                        refresh_token: refresh.value,
                        expires_in_secs: remaining,
                    });
                });
                debug!(expires_in_secs = remaining, "Restored persisted session");
                Restored::Pair
            }
            (None, Some(refresh)) => {
                debug!("Persisted access token expired, refresh token still valid");
                Restored::RefreshOnly(refresh.value)
            }
            (Some(_), None) | (None, None) => {
                if let Err(e) = self.erase() {
                    warn!(error = %e, "Could not remove stray persisted tokens");
                }
                Restored::Empty
            }
        }
    }

    /// Serializes writers so storage sees changes in the same order as memory.
    ///
    /// Storage I/O runs under this lock only; the `watch` lock is held just for
    /// the in-memory swap, so readers never wait on the disk.
    fn writer(&self) -> MutexGuard<'_, ()> {
        self.inner
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_snapshot(snapshot: &mut Snapshot) -> bool {
        if snapshot.pair.take().is_some() {
            snapshot.epoch += 1;
            true
        } else {
            false
        }
    }

    fn persist(&self, pair: &TokenPair) -> Result<(), StorageError> {
        let now = Utc::now();
        let cookie = &self.inner.cookie;
        self.inner.storage.put(
            ACCESS_TOKEN_KEY,
            StoredEntry::new(pair.access_token.clone(), now + self.inner.access_ttl, cookie),
        )?;
        self.inner.storage.put(
            REFRESH_TOKEN_KEY,
            StoredEntry::new(pair.refresh_token.clone(), now + self.inner.refresh_ttl, cookie),
        )
    }

    fn erase(&self) -> Result<(), StorageError> {
        let access = self.inner.storage.remove(ACCESS_TOKEN_KEY);
        let refresh = self.inner.storage.remove(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }
}

/// Replay-latest subscription to the access token
///
/// A new subscriber reads the current value through [`TokenWatch::current`] and then
/// waits for changes. Writes that land between two polls coalesce into the latest one.
pub struct TokenWatch {
    rx: watch::Receiver<Snapshot>,
}

impl TokenWatch {
    pub fn current(&self) -> Option<String> {
        self.rx
            .borrow()
            .pair
            .as_ref()
            .map(|pair| pair.access_token.clone())
    }

    /// Wait for the next change and return the new access token
    ///
    /// Returns `None` once every handle to the store has been dropped.
    pub async fn changed(&mut self) -> Option<Option<String>> {
        self.rx.changed().await.ok()?;
        let snapshot = self.rx.borrow_and_update();
        Some(snapshot.pair.as_ref().map(|pair| pair.access_token.clone()))
    }
}
