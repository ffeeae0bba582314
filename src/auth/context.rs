//! Request-scoped identity produced by a successful authentication.

use serde::{Deserialize, Serialize};

use crate::auth::validator::TokenClaims;
use crate::types::Subject;

/// The validated caller of a single request.
///
/// Serializes as `{identity, is_authenticated, permissions}`, the record the
/// request router consumes. Never cached or shared across requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedIdentity {
    /// Subject identifier (the token's `sub`)
    identity: Subject,
    /// Always true for identities built by a backend
    is_authenticated: bool,
    /// Permissions granted by the provider, in token order
    #[serde(default)]
    permissions: Vec<String>,
}

impl AuthenticatedIdentity {
    /// Create an authenticated identity.
    pub fn new(identity: impl Into<Subject>, permissions: Vec<String>) -> Self {
        Self {
            identity: identity.into(),
            is_authenticated: true,
            permissions,
        }
    }

    /// Build the identity from validated token claims.
    pub fn from_claims(claims: &TokenClaims) -> Self {
        Self::new(claims.sub.as_str(), claims.permissions.clone())
    }

    /// Get the subject identifier.
    pub fn identity(&self) -> &Subject {
        &self.identity
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    /// Get the permission list (possibly empty).
    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }
}
