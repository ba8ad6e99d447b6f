//! Request-scoped caller identity.

use serde::{Deserialize, Serialize};

use crate::db::schema::ValidationResult;
use crate::types::KeyOwner;

/// Identity attached to a request once its API key has been accepted.
///
/// Downstream handlers read it from the request extensions. It is immutable
/// once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyContext {
    owner: KeyOwner,
    key_type: i32,
}

impl ApiKeyContext {
    pub fn new(owner: KeyOwner, key_type: i32) -> Self {
        Self { owner, key_type }
    }

    /// Context for a successful validation; `None` when the key was refused.
    pub fn from_validation(result: ValidationResult) -> Option<Self> {
        match result.owner {
            Some(owner) if result.is_valid => Some(Self::new(owner, result.key_type)),
            _ => None,
        }
    }

    /// Owner of the presented key.
    pub fn owner(&self) -> &KeyOwner {
        &self.owner
    }

    /// Capability tier of the presented key.
    pub fn key_type(&self) -> i32 {
        self.key_type
    }
}
