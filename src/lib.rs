//! Cadence client session core
//!
//! Token lifecycle for the Cadence music-social client: a persisted token store,
//! a request interceptor that attaches bearer tokens, a single-flight refresh
//! coordinator and route guards.

pub mod auth_client;
pub mod config;
pub mod error;
pub mod guards;
pub mod interceptor;
pub mod refresh;
pub mod session;
pub mod storage;
pub mod token_store;
pub mod types;

pub use auth_client::{AuthClient, AuthClientHttp};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use guards::{AuthGuards, GuardDecision};
pub use interceptor::{ExclusionList, Interceptor};
pub use refresh::RefreshCoordinator;
pub use session::Session;
pub use storage::{FileStorage, MemoryStorage, TokenStorage};
pub use token_store::{Persistence, TokenStore, TokenWatch};
pub use types::{Credentials, Registration, SessionEvent, TokenPair};
