//! Bearer token validation against the provider's cached key material.
//!
//! Validation runs as a fixed sequence of stages:
//!
//! 1. parse the three segments (`MalformedToken`)
//! 2. check the header `alg` against [`ALLOWED_ALGORITHMS`] (`UnsupportedAlgorithm`)
//! 3. verify the signature with the key named by `kid` (`Signature`)
//! 4. check `exp`/`nbf` and, if configured, `aud`
//! 5. compare the normalized issuer (`IssuerMismatch`)
//!
//! The algorithm check happens before any key lookup or signature math, so a
//! token declaring `none` or an HMAC algorithm never reaches a verifier.
//!
//! Key rotation is handled in stage 3: when no cached key matches the token's
//! `kid`, the cache is force-refreshed and verification is retried exactly
//! once. No other failure triggers a refresh.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation, decode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::auth::jwks::{KeyCacheError, KeyMaterialCache, SigningKeySet};
use crate::config::normalize_issuer;

/// Asymmetric signing algorithms accepted in token headers.
pub const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// Claims of a validated token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Issuer
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience, normalized to a list
    #[serde(default, deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,
    /// Expiration time (Unix timestamp)
    #[serde(default)]
    pub exp: Option<i64>,
    /// Not-before time (Unix timestamp)
    #[serde(default)]
    pub nbf: Option<i64>,
    /// Issued-at time (Unix timestamp)
    #[serde(default)]
    pub iat: Option<i64>,
    /// Permissions granted to the subject
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Everything else the provider put in the token
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(aud)) => vec![aud],
        Some(OneOrMany::Many(auds)) => auds,
        None => Vec::new(),
    })
}

/// Token header fields the validator looks at before verification.
///
/// `alg` is kept as a raw value so that a missing, `null` or non-string
/// algorithm is reported as unsupported rather than as a parse failure.
#[derive(Debug, Deserialize)]
struct RawHeader {
    #[serde(default)]
    alg: Option<Value>,
    #[serde(default)]
    kid: Option<String>,
}

/// A token that has passed structural parsing.
#[derive(Debug)]
struct ParsedToken<'a> {
    raw: &'a str,
    header: RawHeader,
}

impl<'a> ParsedToken<'a> {
    fn parse(raw: &'a str) -> Result<Self, TokenError> {
        let segments: Vec<&str> = raw.split('.').collect();
        let [header, claims, signature] = segments.as_slice() else {
            return Err(TokenError::MalformedToken(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        };

        let header_bytes = decode_segment(header, "header")?;
        let header: RawHeader = serde_json::from_slice(&header_bytes)
            .map_err(|_| TokenError::MalformedToken("header is not a JSON object".to_string()))?;

        let claims_bytes = decode_segment(claims, "claims")?;
        serde_json::from_slice::<Map<String, Value>>(&claims_bytes)
            .map_err(|_| TokenError::MalformedToken("claims are not a JSON object".to_string()))?;

        decode_segment(signature, "signature")?;

        Ok(Self { raw, header })
    }

    fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// Map the declared algorithm onto the allowlist.
    fn checked_algorithm(&self) -> Result<Algorithm, TokenError> {
        let name = match &self.header.alg {
            Some(Value::String(name)) => name.as_str(),
            Some(other) => return Err(TokenError::UnsupportedAlgorithm(other.to_string())),
            None => return Err(TokenError::UnsupportedAlgorithm("missing".to_string())),
        };

        ALLOWED_ALGORITHMS
            .iter()
            .copied()
            .find(|alg| algorithm_name(*alg) == name)
            .ok_or_else(|| TokenError::UnsupportedAlgorithm(name.to_string()))
    }
}

fn algorithm_name(alg: Algorithm) -> &'static str {
    match alg {
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        Algorithm::ES256 => "ES256",
        Algorithm::ES384 => "ES384",
        _ => "unsupported",
    }
}

fn decode_segment(segment: &str, what: &str) -> Result<Vec<u8>, TokenError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::MalformedToken(format!("{} is not valid base64url", what)))
}

/// Why a single verification attempt failed.
///
/// Only `KeyNotFound` is recoverable, by refreshing the key set once.
#[derive(Debug)]
enum VerifyFailure {
    KeyNotFound(Option<String>),
    Rejected(TokenError),
}

/// Validates bearer tokens issued by the configured OIDC provider.
pub struct TokenValidator {
    cache: Arc<KeyMaterialCache>,
}

impl TokenValidator {
    pub fn new(cache: Arc<KeyMaterialCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<KeyMaterialCache> {
        &self.cache
    }

    /// Validate a raw token (without the `Bearer ` prefix) and return its claims.
    pub async fn validate(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let parsed = ParsedToken::parse(token)?;
        let alg = parsed.checked_algorithm()?;

        let keys = self.cache.get(false).await?;
        let claims = match verify_signature(&parsed, alg, &keys) {
            Ok(claims) => claims,
            Err(VerifyFailure::KeyNotFound(kid)) => {
                info!("No cached key for kid {:?}; refreshing key set once", kid);
                let refreshed = self.cache.get(true).await?;
                match verify_signature(&parsed, alg, &refreshed) {
                    Ok(claims) => claims,
                    Err(VerifyFailure::KeyNotFound(kid)) => {
                        warn!("Key {:?} not found after refresh", kid);
                        return Err(TokenError::Signature(format!(
                            "no signing key matches kid {}",
                            kid.as_deref().unwrap_or("<none>")
                        )));
                    }
                    Err(VerifyFailure::Rejected(e)) => return Err(e),
                }
            }
            Err(VerifyFailure::Rejected(e)) => return Err(e),
        };

        check_subject(&claims)?;
        let config = self.cache.config();
        check_time_claims(&claims, chrono::Utc::now().timestamp(), config.leeway_seconds)?;
        if let Some(audience) = &config.audience {
            check_audience(&claims, audience)?;
        }
        check_issuer(&claims, &config.issuer)?;

        debug!("Token verified for subject: {}", claims.sub);
        Ok(claims)
    }
}

fn verify_signature(
    parsed: &ParsedToken<'_>,
    alg: Algorithm,
    keys: &SigningKeySet,
) -> Result<TokenClaims, VerifyFailure> {
    let key = keys
        .find(parsed.kid())
        .ok_or_else(|| VerifyFailure::KeyNotFound(parsed.kid().map(str::to_string)))?;

    if let Some(key_alg) = key.jwk().alg.as_deref()
        && key_alg != algorithm_name(alg)
    {
        return Err(VerifyFailure::Rejected(TokenError::Signature(format!(
            "key is for {} but token declares {}",
            key_alg,
            algorithm_name(alg)
        ))));
    }

    // Time, audience and issuer are checked after verification, by us.
    let mut validation = Validation::new(alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<TokenClaims>(parsed.raw, key.decoding_key(), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            VerifyFailure::Rejected(match e.kind() {
                ErrorKind::InvalidSignature => {
                    TokenError::Signature("signature verification failed".to_string())
                }
                ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                    TokenError::MalformedToken("claims are missing a string 'sub'".to_string())
                }
                _ => TokenError::Signature(format!("signature verification failed: {}", e)),
            })
        })
}

fn check_subject(claims: &TokenClaims) -> Result<(), TokenError> {
    if claims.sub.trim().is_empty() {
        return Err(TokenError::MalformedToken("'sub' claim is empty".to_string()));
    }
    Ok(())
}

fn check_time_claims(claims: &TokenClaims, now: i64, leeway_seconds: u64) -> Result<(), TokenError> {
    let leeway = i64::try_from(leeway_seconds).unwrap_or(i64::MAX);

    if let Some(exp) = claims.exp
        && exp <= now.saturating_sub(leeway)
    {
        return Err(TokenError::ExpiredToken);
    }

    if let Some(nbf) = claims.nbf
        && nbf > now.saturating_add(leeway)
    {
        return Err(TokenError::NotYetValid);
    }

    Ok(())
}

fn check_audience(claims: &TokenClaims, expected: &str) -> Result<(), TokenError> {
    if claims.aud.iter().any(|aud| aud == expected) {
        Ok(())
    } else {
        Err(TokenError::AudienceMismatch)
    }
}

fn check_issuer(claims: &TokenClaims, configured: &str) -> Result<(), TokenError> {
    let expected = normalize_issuer(configured);
    match claims.iss.as_deref().map(normalize_issuer) {
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => Err(TokenError::IssuerMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }),
        None => Err(TokenError::IssuerMismatch {
            expected: expected.to_string(),
            actual: String::new(),
        }),
    }
}

/// Reasons a token was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Issuer missing or unusable
    Configuration(String),
    /// Discovery document or key set was unusable
    Discovery(String),
    /// Provider could not be reached
    Network(String),
    /// Token is not a well-formed three-segment JWS
    MalformedToken(String),
    /// Header declares an algorithm outside the allowlist (or none)
    UnsupportedAlgorithm(String),
    /// No matching key, or the signature does not verify
    Signature(String),
    /// `exp` is in the past
    ExpiredToken,
    /// `nbf` is in the future
    NotYetValid,
    /// `iss` does not match the configured issuer
    IssuerMismatch { expected: String, actual: String },
    /// `aud` does not contain the configured audience
    AudienceMismatch,
}

impl TokenError {
    /// Short description that is safe to return to clients.
    pub fn detail(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "Authentication is not configured.",
            Self::Discovery(_) | Self::Network(_) => "Unable to verify token at this time.",
            Self::MalformedToken(_) => "Malformed token.",
            Self::UnsupportedAlgorithm(_) => "Unsupported token algorithm.",
            Self::Signature(_) => "Invalid token signature.",
            Self::ExpiredToken => "Token has expired.",
            Self::NotYetValid => "Token is not yet valid.",
            Self::IssuerMismatch { .. } => "Invalid token issuer.",
            Self::AudienceMismatch => "Invalid token audience.",
        }
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            Self::Discovery(msg) => write!(f, "Discovery error: {}", msg),
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::MalformedToken(msg) => write!(f, "Malformed token: {}", msg),
            Self::UnsupportedAlgorithm(alg) => write!(f, "Unsupported algorithm: {}", alg),
            Self::Signature(msg) => write!(f, "Signature error: {}", msg),
            Self::ExpiredToken => write!(f, "Token has expired"),
            Self::NotYetValid => write!(f, "Token is not yet valid"),
            Self::IssuerMismatch { expected, actual } => write!(
                f,
                "Issuer mismatch: expected '{}', got '{}'",
                expected, actual
            ),
            Self::AudienceMismatch => write!(f, "Audience mismatch"),
        }
    }
}

impl std::error::Error for TokenError {}

impl From<KeyCacheError> for TokenError {
    fn from(err: KeyCacheError) -> Self {
        match err {
            KeyCacheError::Configuration(msg) => Self::Configuration(msg),
            KeyCacheError::Discovery(msg) => Self::Discovery(msg),
            KeyCacheError::Network(msg) => Self::Network(msg),
        }
    }
}
