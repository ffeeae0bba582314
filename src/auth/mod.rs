//! Bearer-token authentication against an OIDC provider.
//!
//! ## Flow
//!
//! - [`AuthExtractor`] splits the `Authorization` header and hands the token
//!   to an [`IdentityBackend`]
//! - [`TokenValidator`] checks the algorithm allowlist, verifies the signature
//!   against keys from [`KeyMaterialCache`], then checks time and issuer claims
//! - The resulting [`AuthenticatedIdentity`] feeds the ownership filter
//!
//! ## Security Model
//!
//! - Algorithms outside the asymmetric allowlist are rejected before any key
//!   lookup or network traffic
//! - An unknown `kid` triggers exactly one forced key refresh per request
//! - Every failure surfaces as 401; detail strings never echo token contents
//!
//! ## Usage
//!
//! ```ignore
//! let cache = Arc::new(KeyMaterialCache::new(OidcConfig::from_env()?)?);
//! let extractor = AuthExtractor::new(Arc::new(TokenValidator::new(cache)));
//!
//! let identity = extractor.extract_identity(Some("Bearer eyJ...")).await?;
//! ```

mod context;
mod discovery;
mod extractor;
pub mod jwks;
mod validator;

#[cfg(test)]
mod test_support;

pub use context::AuthenticatedIdentity;
pub use discovery::{ProviderMetadata, fetch_provider_metadata, validate_issuer_url};
pub use extractor::{AuthError, AuthExtractor, IdentityBackend, IdentityFuture, bearer_token};
pub use jwks::{KeyCacheError, KeyMaterialCache, SigningKey, SigningKeySet};
pub use validator::{ALLOWED_ALGORITHMS, TokenClaims, TokenError, TokenValidator};
