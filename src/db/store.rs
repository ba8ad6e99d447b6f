//! The backend-agnostic credential store contract and its factory.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use crate::auth::hash_api_key;
use crate::db::connection::HostedDescriptor;
use crate::db::error::StoreError;
use crate::db::mysql::MySqlCredentialStore;
use crate::db::schema::{BackendKind, CredentialRecord, ValidationResult};
use crate::db::sqlite::SqliteCredentialStore;
use crate::db::sqlserver::SqlServerCredentialStore;
use crate::types::KeyHash;

/// Boxed future returned by the object-safe store traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistence of hashed API keys on one relational backend.
///
/// Operational failures are logged and reported through the return value
/// (`false`, `None` or an empty list); they never propagate as errors. Every
/// lookup ignores inactive records, so a deactivated key and an unknown key
/// are indistinguishable to callers.
pub trait CredentialStore: Send + Sync {
    /// Engine behind this store.
    fn backend(&self) -> BackendKind;

    /// Database (or file) this store writes to.
    fn database_name(&self) -> Option<String>;

    /// Native connection string. Hosted strings carry credentials.
    fn connection_string(&self) -> String;

    /// Create the database, table and stored routines when absent.
    ///
    /// Idempotent: calling it on an existing schema returns `true` and leaves
    /// stored records untouched.
    fn initialize_schema(&self) -> BoxFuture<'_, bool>;

    /// Hash `raw_key` and upsert it for `owner`.
    ///
    /// Storing an existing hash updates its key type and reactivates it; the
    /// original owner is kept.
    fn store_credential<'a>(
        &'a self,
        raw_key: &'a str,
        owner: &'a str,
        key_type: i32,
    ) -> BoxFuture<'a, bool>;

    /// Active record with exactly this hash.
    fn find_by_hash<'a>(&'a self, hash: &'a KeyHash) -> BoxFuture<'a, Option<CredentialRecord>>;

    /// Active record for a raw key, hashed the same way as on insert.
    fn find_by_secret<'a>(&'a self, raw_key: &'a str) -> BoxFuture<'a, Option<CredentialRecord>> {
        Box::pin(async move {
            let hash = hash_api_key(raw_key);
            self.find_by_hash(&hash).await
        })
    }

    /// Every active record belonging to `owner`, oldest first.
    fn list_by_owner<'a>(&'a self, owner: &'a str) -> BoxFuture<'a, Vec<CredentialRecord>>;

    /// Flip the active flag. Returns `true` when a record matched.
    fn set_active<'a>(&'a self, hash: &'a KeyHash, active: bool) -> BoxFuture<'a, bool>;

    /// Validation answer for a hash; see [`ValidationResult`].
    fn validate<'a>(&'a self, hash: &'a KeyHash) -> BoxFuture<'a, ValidationResult> {
        Box::pin(async move { ValidationResult::from(self.find_by_hash(hash).await) })
    }
}

/// Inputs every backend rejects before touching storage.
pub(crate) fn reject_credential_input(raw_key: &str, owner: &str) -> Option<&'static str> {
    if raw_key.is_empty() {
        Some("empty API key")
    } else if owner.trim().is_empty() {
        Some("empty owner")
    } else {
        None
    }
}

/// Builds credential stores from a backend kind and, for hosted engines,
/// a connection descriptor.
pub struct StoreFactory;

impl StoreFactory {
    /// Store for an embedded backend at its platform default location.
    ///
    /// Hosted kinds need a descriptor; use [`StoreFactory::create_hosted`].
    pub fn create(kind: BackendKind) -> Result<Arc<dyn CredentialStore>, StoreError> {
        if kind.is_hosted() {
            return Err(StoreError::UnsupportedBackend(kind));
        }
        Self::create_embedded(None)
    }

    /// SQLite store rooted at `directory` (platform default when `None`).
    pub fn create_embedded(
        directory: Option<PathBuf>,
    ) -> Result<Arc<dyn CredentialStore>, StoreError> {
        Ok(Arc::new(SqliteCredentialStore::new(directory)?))
    }

    /// Store bound to a hosted descriptor. No connection is opened here.
    pub fn create_hosted(
        kind: BackendKind,
        descriptor: HostedDescriptor,
    ) -> Result<Arc<dyn CredentialStore>, StoreError> {
        match (kind, descriptor) {
            (BackendKind::Sqlite, _) => Err(StoreError::UnsupportedBackend(kind)),
            (BackendKind::MySql, HostedDescriptor::MySql(descriptor)) => {
                Ok(Arc::new(MySqlCredentialStore::new(descriptor)?))
            }
            (BackendKind::SqlServer, HostedDescriptor::SqlServer(descriptor)) => {
                Ok(Arc::new(SqlServerCredentialStore::new(descriptor)?))
            }
            (kind, descriptor) => Err(StoreError::config(format!(
                "{} descriptor cannot back a {} store",
                descriptor.backend(),
                kind
            ))),
        }
    }
}

/// Behaviour every backend must show, run against a live store.
#[cfg(test)]
pub(crate) mod contract {
    use super::CredentialStore;
    use crate::auth::{generate_api_key, hash_api_key};

    /// Fresh owner name, so runs against a shared server do not collide.
    fn unique_owner(prefix: &str) -> String {
        format!("{}-{}", prefix, &hash_api_key(&generate_api_key()).as_str()[..12])
    }

    pub(crate) async fn exercise(store: &dyn CredentialStore) {
        assert!(store.initialize_schema().await);
        assert!(store.initialize_schema().await);

        let owner = unique_owner("owner");
        let other = unique_owner("other");
        let raw = generate_api_key();
        let hash = hash_api_key(&raw);

        // round trip
        assert!(store.store_credential(&raw, &owner, 0).await);
        let record = store.find_by_secret(&raw).await.unwrap();
        assert_eq!(record.hash, hash);
        assert_eq!(record.owner.as_str(), owner);
        assert_eq!(record.key_type, 0);
        assert!(record.is_active);
        assert_eq!(store.find_by_hash(&hash).await, Some(record));

        let validation = store.validate(&hash).await;
        assert!(validation.is_valid);
        assert_eq!(validation.owner.as_ref().map(|o| o.as_str()), Some(owner.as_str()));

        // upsert keeps the owner and updates the key type
        assert!(store.store_credential(&raw, &other, 7).await);
        let updated = store.find_by_hash(&hash).await.unwrap();
        assert_eq!(updated.owner.as_str(), owner);
        assert_eq!(updated.key_type, 7);

        // owner isolation
        let other_raw = generate_api_key();
        assert!(store.store_credential(&other_raw, &other, 0).await);
        let mine = store.list_by_owner(&owner).await;
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].hash, hash);
        let theirs = store.list_by_owner(&other).await;
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].hash, hash_api_key(&other_raw));

        // deactivation hides the record everywhere
        assert!(store.set_active(&hash, false).await);
        assert!(store.find_by_hash(&hash).await.is_none());
        assert!(store.find_by_secret(&raw).await.is_none());
        assert!(!store.validate(&hash).await.is_valid);
        assert!(store.list_by_owner(&owner).await.is_empty());

        // storing again reactivates
        assert!(store.store_credential(&raw, &owner, 7).await);
        assert!(store.find_by_hash(&hash).await.is_some());

        assert!(store.find_by_secret(&generate_api_key()).await.is_none());
        assert!(!store.set_active(&hash_api_key(&generate_api_key()), false).await);
    }
}
