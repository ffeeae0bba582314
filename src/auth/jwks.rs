//! JWKS (JSON Web Key Set) fetching and caching module.
//!
//! The provider's key set is discovered through its OIDC metadata document,
//! parsed into verification keys, and held as one immutable snapshot. A
//! refresh builds a complete new snapshot and swaps it in; snapshots are
//! never merged or edited in place.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::auth::discovery::{fetch_json, fetch_provider_metadata, validate_issuer_url};
use crate::config::OidcConfig;
use crate::types::KeyId;

/// A single JSON Web Key from a JWKS document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA", "EC")
    #[serde(default)]
    pub kty: String,
    /// Key ID, matched against the token header's `kid`
    pub kid: Option<String>,
    /// Algorithm the key is meant for (e.g., "RS256")
    pub alg: Option<String>,
    /// Key use ("sig" or "enc")
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url encoded)
    pub n: Option<String>,
    /// RSA exponent (base64url encoded)
    pub e: Option<String>,
    /// EC curve name (e.g., "P-256")
    pub crv: Option<String>,
    /// EC x coordinate (base64url encoded)
    pub x: Option<String>,
    /// EC y coordinate (base64url encoded)
    pub y: Option<String>,
}

/// A JWKS document containing multiple keys.
///
/// Entries stay raw JSON until [`SigningKeySet::from_document`] so that one
/// malformed key cannot fail the whole set.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<serde_json::Value>,
}

/// A parsed verification key.
#[derive(Clone)]
pub struct SigningKey {
    kid: Option<KeyId>,
    jwk: Jwk,
    decoding_key: DecodingKey,
}

impl SigningKey {
    pub fn kid(&self) -> Option<&KeyId> {
        self.kid.as_ref()
    }

    /// The JWK this key was built from.
    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("kty", &self.jwk.kty)
            .field("alg", &self.jwk.alg)
            .finish_non_exhaustive()
    }
}

/// One complete snapshot of the provider's verification keys.
#[derive(Debug, Clone)]
pub struct SigningKeySet {
    keys: Vec<SigningKey>,
    jwks_uri: String,
}

impl SigningKeySet {
    /// Build a snapshot from a fetched document.
    ///
    /// Entries that do not parse, encryption keys, unsupported key types and
    /// keys with unusable parameters are skipped; everything else is kept in
    /// document order.
    pub fn from_document(document: JwksDocument, jwks_uri: impl Into<String>) -> Self {
        let mut keys = Vec::with_capacity(document.keys.len());

        for entry in document.keys {
            let jwk: Jwk = match serde_json::from_value(entry) {
                Ok(jwk) => jwk,
                Err(e) => {
                    warn!("Skipping unparsable JWK: {}", e);
                    continue;
                }
            };

            if jwk.key_use.as_deref() == Some("enc") {
                debug!("Skipping encryption key {:?}", jwk.kid);
                continue;
            }

            match jwk_to_decoding_key(&jwk) {
                Ok(decoding_key) => {
                    debug!("Cached key with kid: {:?}", jwk.kid);
                    keys.push(SigningKey {
                        kid: jwk.kid.clone().map(KeyId::new),
                        jwk,
                        decoding_key,
                    });
                }
                Err(e) => {
                    warn!("Skipping JWK {:?}: {}", jwk.kid, e);
                }
            }
        }

        Self {
            keys,
            jwks_uri: jwks_uri.into(),
        }
    }

    /// Look up the key for a token header's `kid`.
    ///
    /// A token without a `kid` only matches a set holding exactly one key.
    pub fn find(&self, kid: Option<&str>) -> Option<&SigningKey> {
        match (kid, self.keys.as_slice()) {
            (Some(k), keys) => keys
                .iter()
                .find(|key| key.kid.as_ref().map(KeyId::as_str) == Some(k)),
            (None, [only]) => Some(only),
            (None, _) => None,
        }
    }

    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    /// Key IDs in document order; keys without an ID are left out.
    pub fn kids(&self) -> Vec<&str> {
        self.keys
            .iter()
            .filter_map(|key| key.kid.as_ref().map(KeyId::as_str))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Where this snapshot was fetched from.
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }
}

/// Convert a JWK to a jsonwebtoken DecodingKey.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, String> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_ref().ok_or("missing 'n' in RSA key")?;
            let e = jwk.e.as_ref().ok_or("missing 'e' in RSA key")?;
            DecodingKey::from_rsa_components(n, e)
                .map_err(|e| format!("invalid RSA components: {}", e))
        }
        "EC" => {
            let x = jwk.x.as_ref().ok_or("missing 'x' in EC key")?;
            let y = jwk.y.as_ref().ok_or("missing 'y' in EC key")?;
            DecodingKey::from_ec_components(x, y)
                .map_err(|e| format!("invalid EC components: {}", e))
        }
        other => Err(format!("unsupported key type '{}'", other)),
    }
}

/// Process-wide cache of the provider's signing keys.
///
/// Readers clone the current `Arc` snapshot under a short read lock. A
/// refresh fetches without holding the lock and swaps the snapshot under a
/// short write lock, so readers see either the old or the new set. Two
/// refreshes racing each other are harmless: both write complete snapshots.
pub struct KeyMaterialCache {
    config: OidcConfig,
    client: reqwest::Client,
    current: RwLock<Option<Arc<SigningKeySet>>>,
}

impl KeyMaterialCache {
    /// Create a cache with an HTTP client honouring the configured timeout.
    pub fn new(config: OidcConfig) -> Result<Self, KeyCacheError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()
            .map_err(|e| {
                KeyCacheError::Configuration(format!("failed to create HTTP client: {}", e))
            })?;
        Ok(Self::with_client(config, client))
    }

    /// Create a cache around an existing HTTP client.
    pub fn with_client(config: OidcConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            current: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// Get the current key set.
    ///
    /// With `force_refresh == false` and a populated cache this performs no
    /// I/O. Otherwise the discovery document and key set are fetched and the
    /// snapshot is replaced. Fetch errors are returned as-is; retrying is the
    /// caller's decision.
    pub async fn get(&self, force_refresh: bool) -> Result<Arc<SigningKeySet>, KeyCacheError> {
        self.ensure_configured()?;

        if !force_refresh && let Some(current) = self.current.read().await.as_ref() {
            return Ok(current.clone());
        }

        let fresh = Arc::new(self.fetch_key_set().await?);

        {
            let mut current = self.current.write().await;
            *current = Some(fresh.clone());
        }

        info!(
            "Cached {} signing keys from {} (forced: {})",
            fresh.len(),
            fresh.jwks_uri(),
            force_refresh
        );
        Ok(fresh)
    }

    /// Peek at the cached snapshot without fetching.
    pub async fn cached(&self) -> Option<Arc<SigningKeySet>> {
        self.current.read().await.clone()
    }

    /// Drop the cached snapshot; the next `get` repopulates it.
    pub async fn invalidate(&self) {
        let mut current = self.current.write().await;
        *current = None;
    }

    fn ensure_configured(&self) -> Result<(), KeyCacheError> {
        if !self.config.is_configured() {
            return Err(KeyCacheError::Configuration(
                "AUTH_OIDC_ISSUER environment variable is not set".to_string(),
            ));
        }
        validate_issuer_url(&self.config.issuer)
    }

    async fn fetch_key_set(&self) -> Result<SigningKeySet, KeyCacheError> {
        let metadata = fetch_provider_metadata(&self.client, &self.config).await?;
        let jwks_uri = metadata.jwks_uri()?;

        debug!("Fetching JWKS from {}", jwks_uri);
        let document: JwksDocument = fetch_json(&self.client, jwks_uri, "JWKS endpoint").await?;

        let set = SigningKeySet::from_document(document, jwks_uri);
        if set.is_empty() {
            warn!("JWKS at {} contained no usable signing keys", jwks_uri);
        }
        Ok(set)
    }
}

/// Errors that can occur when populating the key cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCacheError {
    /// Issuer missing or unusable. Fatal; fix the configuration.
    Configuration(String),
    /// Discovery document or key set did not have the expected shape.
    Discovery(String),
    /// Transport failure, timeout or non-success HTTP status.
    Network(String),
}

impl fmt::Display for KeyCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "OIDC configuration error: {}", msg),
            Self::Discovery(msg) => write!(f, "OIDC discovery failed: {}", msg),
            Self::Network(msg) => write!(f, "Failed to fetch key material: {}", msg),
        }
    }
}

impl std::error::Error for KeyCacheError {}
