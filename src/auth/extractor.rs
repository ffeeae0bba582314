//! Authentication extractor for HTTP requests.
//!
//! Turns an `Authorization` header value into an [`AuthenticatedIdentity`]
//! through a pluggable [`IdentityBackend`]. Every failure is an [`AuthError`]
//! that maps to HTTP 401.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, warn};

use crate::auth::context::AuthenticatedIdentity;
use crate::auth::validator::{TokenError, TokenValidator};

/// Boxed future returned by [`IdentityBackend::validate`].
pub type IdentityFuture<'a> =
    Pin<Box<dyn Future<Output = Result<AuthenticatedIdentity, TokenError>> + Send + 'a>>;

/// Something that can turn a bearer token into an identity.
///
/// The OIDC [`TokenValidator`] is one implementation; other session-backed
/// providers can be swapped in without touching the ownership filter.
pub trait IdentityBackend: Send + Sync {
    /// Short name for logs (e.g., "oidc").
    fn name(&self) -> &str;

    /// Validate a raw token (without the scheme prefix).
    fn validate<'a>(&'a self, token: &'a str) -> IdentityFuture<'a>;
}

impl IdentityBackend for TokenValidator {
    fn name(&self) -> &str {
        "oidc"
    }

    fn validate<'a>(&'a self, token: &'a str) -> IdentityFuture<'a> {
        Box::pin(async move {
            let claims = TokenValidator::validate(self, token).await?;
            Ok(AuthenticatedIdentity::from_claims(&claims))
        })
    }
}

/// Authentication errors, all surfaced as 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No `Authorization` header, or an empty one
    MissingToken,
    /// Header is not `<scheme> <token>`
    InvalidHeaderFormat,
    /// Scheme is not `Bearer`
    InvalidScheme,
    /// Token was presented but rejected
    Token(TokenError),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    /// Client-facing detail string; never includes token or provider internals.
    pub fn detail(&self) -> &'static str {
        match self {
            Self::MissingToken => "No token provided.",
            Self::InvalidHeaderFormat => "Invalid authorization header format.",
            Self::InvalidScheme => "Invalid auth scheme. Expected 'Bearer'.",
            Self::Token(e) => e.detail(),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToken => write!(f, "No token provided"),
            Self::InvalidHeaderFormat => write!(f, "Invalid authorization header format"),
            Self::InvalidScheme => write!(f, "Invalid auth scheme"),
            Self::Token(e) => write!(f, "Invalid token: {}", e),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        Self::Token(err)
    }
}

/// Split an `Authorization` header value into its bearer token.
pub fn bearer_token(authorization: Option<&str>) -> Result<&str, AuthError> {
    let header = authorization
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(AuthError::MissingToken)?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or(AuthError::InvalidHeaderFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidScheme);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::InvalidHeaderFormat);
    }

    Ok(token)
}

/// Authentication extractor for HTTP requests.
#[derive(Clone)]
pub struct AuthExtractor {
    backend: Arc<dyn IdentityBackend>,
}

impl AuthExtractor {
    /// Create a new auth extractor.
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn IdentityBackend> {
        &self.backend
    }

    /// Extract the caller's identity from an `Authorization` header value.
    pub async fn extract_identity(
        &self,
        authorization: Option<&str>,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        let token = bearer_token(authorization).inspect_err(|e| {
            debug!("Rejected authorization header: {}", e);
        })?;

        match self.backend.validate(token).await {
            Ok(identity) => {
                debug!(
                    "Authenticated {} via {}",
                    identity.identity(),
                    self.backend.name()
                );
                Ok(identity)
            }
            Err(e) => {
                warn!("Token rejected by {} backend: {}", self.backend.name(), e);
                Err(AuthError::Token(e))
            }
        }
    }
}
