//! Ownership-based access filtering for multi-tenant isolation.
//!
//! Every resource operation runs through [`OwnershipFilterer`], which derives an
//! [`AccessFilter`] from the authenticated identity and stamps it onto the
//! operation's metadata. The resource store enforces the returned filter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::auth::AuthenticatedIdentity;
use crate::types::Subject;

/// Metadata key carrying the owning subject.
pub const OWNER_KEY: &str = "owner";

/// Metadata key on operation payloads.
pub const METADATA_KEY: &str = "metadata";

/// Restriction `{ "owner": <subject> }` applied to a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessFilter {
    owner: Subject,
}

impl AccessFilter {
    pub fn new(owner: impl Into<Subject>) -> Self {
        Self {
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &Subject {
        &self.owner
    }

    /// Render as a JSON object for query builders.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(OWNER_KEY.to_string(), Value::String(self.owner.to_string()));
        Value::Object(map)
    }

    /// Check whether stored resource metadata belongs to this filter's owner.
    pub fn matches(&self, metadata: &Value) -> bool {
        metadata
            .get(OWNER_KEY)
            .and_then(Value::as_str)
            .is_some_and(|owner| owner == self.owner.as_str())
    }
}

/// Kind of resource operation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Read,
    Update,
    Delete,
    Search,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        Self::Create,
        Self::Read,
        Self::Update,
        Self::Delete,
        Self::Search,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Search => "search",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown operation: {}", s))
    }
}

/// Derives and applies per-request ownership filters.
///
/// Stateless; the identity passed in is trusted as already validated.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipFilterer;

impl OwnershipFilterer {
    pub fn new() -> Self {
        Self
    }

    /// Build `{owner: sub}` and merge it into `payload.metadata`.
    ///
    /// `metadata` is created when absent or not an object. Other metadata keys
    /// are preserved; an existing `owner` is overwritten. A payload that is not
    /// a JSON object is replaced by an object holding only the metadata.
    pub fn authorize(&self, identity: &AuthenticatedIdentity, payload: &mut Value) -> AccessFilter {
        let filter = AccessFilter::new(identity.identity().clone());

        if !payload.is_object() {
            *payload = Value::Object(Map::new());
        }
        if let Value::Object(fields) = payload {
            let metadata = fields
                .entry(METADATA_KEY)
                .or_insert_with(|| Value::Object(Map::new()));
            if !metadata.is_object() {
                *metadata = Value::Object(Map::new());
            }
            if let Value::Object(metadata) = metadata {
                metadata.insert(
                    OWNER_KEY.to_string(),
                    Value::String(filter.owner().to_string()),
                );
            }
        }

        filter
    }

    /// [`authorize`](Self::authorize) for a named operation kind.
    pub fn authorize_operation(
        &self,
        identity: &AuthenticatedIdentity,
        operation: OperationKind,
        payload: &mut Value,
    ) -> AccessFilter {
        let filter = self.authorize(identity, payload);
        debug!("Scoped {} to owner {}", operation, filter.owner());
        filter
    }
}
