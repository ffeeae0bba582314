use serde::{Deserialize, Serialize};
use std::env;

/// Default HTTP timeout for discovery and key-set fetches, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Default clock leeway for `exp`/`nbf` checks, in seconds.
pub const DEFAULT_LEEWAY_SECONDS: u64 = 0;

pub const ISSUER_ENV: &str = "AUTH_OIDC_ISSUER";
pub const AUDIENCE_ENV: &str = "AUTH_OIDC_AUDIENCE";
pub const DISCOVERY_URL_ENV: &str = "AUTH_OIDC_DISCOVERY_URL";
pub const HTTP_TIMEOUT_ENV: &str = "AUTH_OIDC_HTTP_TIMEOUT_SECONDS";
pub const LEEWAY_ENV: &str = "AUTH_OIDC_LEEWAY_SECONDS";

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// OIDC provider configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Issuer base URL. Empty means "not configured".
    #[serde(default)]
    pub issuer: String,
    /// Expected audience; audience is not checked when unset.
    #[serde(default)]
    pub audience: Option<String>,
    /// Discovery document location, when the provider does not serve it
    /// under the issuer's well-known path.
    #[serde(default)]
    pub discovery_url: Option<String>,
    /// Timeout applied to every outbound fetch.
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    /// Clock leeway for time-based claims.
    #[serde(default = "default_leeway_seconds")]
    pub leeway_seconds: u64,
}

fn default_http_timeout_seconds() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECONDS
}

fn default_leeway_seconds() -> u64 {
    DEFAULT_LEEWAY_SECONDS
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            audience: None,
            discovery_url: None,
            http_timeout_seconds: DEFAULT_HTTP_TIMEOUT_SECONDS,
            leeway_seconds: DEFAULT_LEEWAY_SECONDS,
        }
    }
}

impl OidcConfig {
    /// Config for a single issuer with every other option at its default.
    pub fn with_issuer(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            ..Default::default()
        }
    }

    /// Load configuration from `AUTH_OIDC_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let http_timeout_seconds = match non_empty(HTTP_TIMEOUT_ENV) {
            Some(raw) => parse_seconds(HTTP_TIMEOUT_ENV, &raw)?,
            None => DEFAULT_HTTP_TIMEOUT_SECONDS,
        };
        let leeway_seconds = match non_empty(LEEWAY_ENV) {
            Some(raw) => parse_seconds(LEEWAY_ENV, &raw)?,
            None => DEFAULT_LEEWAY_SECONDS,
        };

        Ok(Self {
            issuer: lookup(ISSUER_ENV).unwrap_or_default().trim().to_string(),
            audience: non_empty(AUDIENCE_ENV),
            discovery_url: non_empty(DISCOVERY_URL_ENV),
            http_timeout_seconds,
            leeway_seconds,
        })
    }

    /// Whether an issuer has been set at all.
    pub fn is_configured(&self) -> bool {
        !self.issuer.trim().is_empty()
    }

    /// The issuer with any trailing path separator removed.
    pub fn normalized_issuer(&self) -> &str {
        normalize_issuer(&self.issuer)
    }

    /// Where the discovery document lives for this issuer.
    pub fn discovery_url(&self) -> String {
        match &self.discovery_url {
            Some(url) => url.clone(),
            None => format!("{}/{}", self.normalized_issuer(), DISCOVERY_PATH),
        }
    }
}

/// Trim trailing `/` so `https://idp/` and `https://idp` compare equal.
pub fn normalize_issuer(issuer: &str) -> &str {
    issuer.trim().trim_end_matches('/')
}

fn parse_seconds(name: &str, raw: &str) -> anyhow::Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| anyhow::anyhow!("`{}` must be a whole number of seconds: {}", name, e))
}
