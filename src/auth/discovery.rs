//! OIDC discovery document fetching.
//!
//! The discovery document is fetched every time the key set is rebuilt and is
//! never cached on its own: providers may move their `jwks_uri`.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::jwks::KeyCacheError;
use crate::config::{OidcConfig, normalize_issuer};

/// Provider metadata from `/.well-known/openid-configuration` (partial).
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    /// Canonical issuer string advertised by the provider.
    #[serde(default)]
    pub issuer: Option<String>,
    /// Location of the provider's JSON Web Key Set.
    #[serde(default)]
    pub jwks_uri: Option<String>,
}

impl ProviderMetadata {
    /// The key-set location, or a discovery error when the provider omitted it.
    pub fn jwks_uri(&self) -> Result<&str, KeyCacheError> {
        self.jwks_uri
            .as_deref()
            .filter(|uri| !uri.trim().is_empty())
            .ok_or_else(|| {
                KeyCacheError::Discovery("JWKS URI not found in discovery document".to_string())
            })
    }
}

/// Fetch and check the discovery document for the configured issuer.
pub async fn fetch_provider_metadata(
    client: &reqwest::Client,
    config: &OidcConfig,
) -> Result<ProviderMetadata, KeyCacheError> {
    let discovery_url = config.discovery_url();
    debug!("Fetching OIDC discovery document from {}", discovery_url);

    let metadata: ProviderMetadata = fetch_json(client, &discovery_url, "discovery endpoint").await?;

    // Resolve jwks_uri eagerly so a document without it fails here.
    metadata.jwks_uri()?;

    if let Some(advertised) = metadata.issuer.as_deref()
        && normalize_issuer(advertised) != config.normalized_issuer()
    {
        warn!(
            "Discovery document issuer '{}' does not match configured issuer '{}'",
            advertised, config.issuer
        );
        return Err(KeyCacheError::Discovery(format!(
            "issuer mismatch in discovery document: expected '{}', got '{}'",
            config.normalized_issuer(),
            advertised
        )));
    }

    Ok(metadata)
}

/// GET a JSON document. Transport failures and non-2xx statuses are network
/// errors; a body that does not parse is a discovery error.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    what: &str,
) -> Result<T, KeyCacheError> {
    let response = client
        .get(url)
        .header(http::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| KeyCacheError::Network(describe_transport_error(what, &e)))?;

    if !response.status().is_success() {
        return Err(KeyCacheError::Network(format!(
            "HTTP {} from {}",
            response.status(),
            what
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| KeyCacheError::Network(describe_transport_error(what, &e)))?;

    serde_json::from_slice(&body)
        .map_err(|e| KeyCacheError::Discovery(format!("invalid JSON from {}: {}", what, e)))
}

fn describe_transport_error(what: &str, err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out contacting {}", what)
    } else {
        format!("failed to reach {}: {}", what, err)
    }
}

/// Reject issuer URLs that cannot be a valid OIDC issuer.
///
/// Plain HTTP is only accepted for loopback hosts.
pub fn validate_issuer_url(issuer: &str) -> Result<(), KeyCacheError> {
    let url = url::Url::parse(issuer.trim())
        .map_err(|e| KeyCacheError::Configuration(format!("invalid issuer URL: {}", e)))?;

    let is_loopback = matches!(
        url.host_str(),
        Some("localhost") | Some("127.0.0.1") | Some("[::1]")
    );
    if url.scheme() != "https" && !(url.scheme() == "http" && is_loopback) {
        return Err(KeyCacheError::Configuration(
            "issuer must use HTTPS".to_string(),
        ));
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(KeyCacheError::Configuration(
            "issuer URL must not have a query or fragment".to_string(),
        ));
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(KeyCacheError::Configuration(
            "issuer URL must not carry credentials".to_string(),
        ));
    }

    Ok(())
}
