// Core modules
mod config;
mod filter;
mod types;
pub mod api;
pub mod auth;

// Re-export key types and functions
pub use auth::{
    AuthError, AuthExtractor, AuthenticatedIdentity, IdentityBackend, KeyCacheError,
    KeyMaterialCache, TokenClaims, TokenError, TokenValidator,
};
pub use config::{OidcConfig, normalize_issuer};
pub use filter::{AccessFilter, OperationKind, OwnershipFilterer};
pub use types::{KeyId, Subject};

use std::sync::Arc;

/// Convenience function to build the request-facing extractor.
///
/// This creates the key cache and the OIDC validator backing it. No network
/// traffic happens until the first token is validated.
pub fn create_extractor(config: OidcConfig) -> Result<AuthExtractor, KeyCacheError> {
    let cache = Arc::new(KeyMaterialCache::new(config)?);
    Ok(AuthExtractor::new(Arc::new(TokenValidator::new(cache))))
}
