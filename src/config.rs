//! Client configuration
//!
//! Every field has a default, so an empty source yields a working configuration.
//! Values can be layered from an optional file and `CADENCE__*` environment variables.

use crate::error::Result;
use chrono::Duration;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Configuration for the session core
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API base URL, without trailing slash
    pub base_url: String,

    /// Paths that never carry a bearer token and never trigger a refresh
    pub excluded_endpoints: Vec<String>,

    /// Lifetime of the persisted access token entry
    /// Default: 30 minutes
    pub access_token_ttl_secs: i64,

    /// Lifetime of the persisted refresh token entry
    /// Default: 7 days
    pub refresh_token_ttl_secs: i64,

    /// Timeout applied to every HTTP call, in seconds
    pub request_timeout_secs: u64,

    /// Buffer size of the session event channel
    pub event_capacity: usize,

    pub cookie: CookieConfig,
    pub routes: RouteConfig,
}

/// Attributes written alongside each persisted token entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    pub path: String,
    pub same_site: SameSite,
    /// Expected to be on in production deployments
    pub secure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Landing routes handed to the router by the guards
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Where unauthenticated users are sent
    pub guest: String,
    /// Where authenticated users are sent when they hit a guest-only page
    pub authenticated: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            excluded_endpoints: vec![
                "/auth/login".to_string(),
                "/auth/register".to_string(),
                "/auth/refresh".to_string(),
                "/auth/revoke".to_string(),
            ],
            access_token_ttl_secs: 30 * 60,
            refresh_token_ttl_secs: 7 * 24 * 60 * 60,
            request_timeout_secs: 30,
            event_capacity: 16,
            cookie: CookieConfig::default(),
            routes: RouteConfig::default(),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            same_site: SameSite::Strict,
            secure: true,
        }
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            guest: "/login".to_string(),
            authenticated: "/home".to_string(),
        }
    }
}

impl ClientConfig {
    /// Build a configuration for `base_url`, everything else at defaults
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from an optional file, overridden by `CADENCE__*` variables
    ///
    /// Nested keys use `__`, e.g. `CADENCE__COOKIE__SECURE=false`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("CADENCE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("excluded_endpoints")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Absolute URL for an API path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn access_token_ttl(&self) -> Duration {
        Duration::seconds(self.access_token_ttl_secs)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::seconds(self.refresh_token_ttl_secs)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();

        assert_eq!(config.access_token_ttl(), Duration::minutes(30));
        assert_eq!(config.refresh_token_ttl(), Duration::days(7));
        assert_eq!(config.cookie.path, "/");
        assert_eq!(config.cookie.same_site, SameSite::Strict);
        assert!(config.cookie.secure);
        assert!(config.excluded_endpoints.contains(&"/auth/refresh".to_string()));
    }

    #[test]
    fn test_load_from_file_keeps_unset_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
base_url = "https://api.cadence.fm"
access_token_ttl_secs = 600

[cookie]
secure = false
same_site = "lax"

[routes]
guest = "/welcome"
"#
        )
        .unwrap();

        let config = ClientConfig::load(file.path().to_str()).unwrap();

        assert_eq!(config.base_url, "https://api.cadence.fm");
        assert_eq!(config.access_token_ttl_secs, 600);
        assert_eq!(config.refresh_token_ttl_secs, 7 * 24 * 60 * 60);
        assert_eq!(config.cookie.same_site, SameSite::Lax);
        assert!(!config.cookie.secure);
        assert_eq!(config.cookie.path, "/");
        assert_eq!(config.routes.guest, "/welcome");
        assert_eq!(config.routes.authenticated, "/home");
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let config = ClientConfig::new("http://localhost:9000/");
        assert_eq!(config.url("/auth/refresh"), "http://localhost:9000/auth/refresh");
    }
}
