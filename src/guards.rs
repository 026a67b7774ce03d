//! Route guards for the router

use crate::config::RouteConfig;
use crate::token_store::TokenStore;

/// Verdict handed back to the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(String),
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

/// Admission checks evaluated against the store on every navigation
#[derive(Clone)]
pub struct AuthGuards {
    token_store: TokenStore,
    routes: RouteConfig,
}

impl AuthGuards {
    pub fn new(token_store: TokenStore, routes: RouteConfig) -> Self {
        Self { token_store, routes }
    }

    /// Admit authenticated users; send everyone else to the guest landing route
    pub fn requires_auth(&self) -> GuardDecision {
        if self.token_store.is_authenticated() {
            GuardDecision::Allow
        } else {
            GuardDecision::Redirect(self.routes.guest.clone())
        }
    }

    /// Admit guests; send signed-in users to the authenticated landing route
    pub fn guest_only(&self) -> GuardDecision {
        if self.token_store.is_authenticated() {
            GuardDecision::Redirect(self.routes.authenticated.clone())
        } else {
            GuardDecision::Allow
        }
    }
}
