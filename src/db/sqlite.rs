//! Embedded credential store backed by a single SQLite file.
//!
//! Each operation opens its own connection on the blocking thread pool, so
//! the async runtime never waits on disk I/O and no connection outlives the
//! call that used it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, error, info, warn};

use crate::auth::hash_api_key;
use crate::db::connection::{ConnectionDescriptor, SqliteLocation};
use crate::db::error::StoreError;
use crate::db::schema::{BackendKind, CredentialRecord, parse_sqlite_timestamp};
use crate::db::store::{BoxFuture, CredentialStore, reject_credential_input};
use crate::types::{KeyHash, KeyOwner};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ApiKeys (
        Id          INTEGER PRIMARY KEY AUTOINCREMENT,
        HashedKey   TEXT    NOT NULL UNIQUE,
        Owner       TEXT    NOT NULL,
        KeyType     INTEGER NOT NULL DEFAULT 0,
        IsActive    INTEGER NOT NULL DEFAULT 1,
        KeyId       TEXT,
        CreatedUtc  TEXT    NOT NULL DEFAULT (datetime('now'))
    );

    CREATE INDEX IF NOT EXISTS idx_apikeys_owner ON ApiKeys(Owner);
";

const UPSERT: &str = "
    INSERT INTO ApiKeys (HashedKey, Owner, KeyType, IsActive)
    VALUES (?1, ?2, ?3, 1)
    ON CONFLICT(HashedKey) DO UPDATE SET KeyType = excluded.KeyType, IsActive = 1
";

const SELECT_COLUMNS: &str = "SELECT HashedKey, Owner, KeyType, IsActive, KeyId, CreatedUtc FROM ApiKeys";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Credential store on the embedded engine.
#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    location: SqliteLocation,
}

impl SqliteCredentialStore {
    /// Store in `directory`, or the platform default data directory.
    pub fn new(directory: Option<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self::with_location(SqliteLocation::new(directory)?))
    }

    pub fn with_location(location: SqliteLocation) -> Self {
        Self { location }
    }

    pub fn location(&self) -> &SqliteLocation {
        &self.location
    }

    /// Run `op` against a fresh connection on the blocking pool.
    ///
    /// Failures are logged under `operation` and collapse to `None`.
    async fn run<T, F>(&self, operation: &'static str, op: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let path = self.location.path();

        let joined = tokio::task::spawn_blocking(move || {
            let conn = open(&path)?;
            op(&conn)
        })
        .await;

        match joined {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(backend = "sqlite", operation, error = %e, "Credential store operation failed");
                None
            }
            Err(e) => {
                error!(backend = "sqlite", operation, error = %e, "Blocking task panicked or was cancelled");
                None
            }
        }
    }
}

fn open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CredentialRecord> {
    let created: Option<String> = row.get(5)?;
    Ok(CredentialRecord {
        hash: KeyHash::new(row.get::<_, String>(0)?),
        owner: KeyOwner::new(row.get::<_, String>(1)?),
        key_type: row.get(2)?,
        is_active: row.get::<_, i64>(3)? != 0,
        external_id: row.get(4)?,
        created_at: created.as_deref().and_then(parse_sqlite_timestamp),
    })
}

impl CredentialStore for SqliteCredentialStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn database_name(&self) -> Option<String> {
        self.location.database().map(str::to_string)
    }

    fn connection_string(&self) -> String {
        self.location.connection_string()
    }

    fn initialize_schema(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let created = self
                .run("initialize_schema", |conn| {
                    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                    conn.execute_batch(SCHEMA)
                })
                .await
                .is_some();

            if created {
                info!(path = %self.location.path().display(), "SQLite credential schema ready");
            }
            created
        })
    }

    fn store_credential<'a>(
        &'a self,
        raw_key: &'a str,
        owner: &'a str,
        key_type: i32,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if let Some(reason) = reject_credential_input(raw_key, owner) {
                warn!(backend = "sqlite", reason, "Refusing to store credential");
                return false;
            }

            let hash = hash_api_key(raw_key);
            let short = hash.short().to_string();
            let owner = owner.to_string();

            let stored = self
                .run("store_credential", move |conn| {
                    conn.execute(UPSERT, params![hash.as_str(), owner, key_type])
                })
                .await
                .is_some();

            if stored {
                debug!(backend = "sqlite", hash = %short, key_type, "Stored credential");
            }
            stored
        })
    }

    fn find_by_hash<'a>(&'a self, hash: &'a KeyHash) -> BoxFuture<'a, Option<CredentialRecord>> {
        Box::pin(async move {
            let hash = hash.clone();
            self.run("find_by_hash", move |conn| {
                conn.query_row(
                    &format!("{} WHERE HashedKey = ?1 AND IsActive = 1", SELECT_COLUMNS),
                    params![hash.as_str()],
                    record_from_row,
                )
                .optional()
            })
            .await
            .flatten()
        })
    }

    fn list_by_owner<'a>(&'a self, owner: &'a str) -> BoxFuture<'a, Vec<CredentialRecord>> {
        Box::pin(async move {
            let owner = owner.to_string();
            self.run("list_by_owner", move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE Owner = ?1 AND IsActive = 1 ORDER BY Id",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt.query_map(params![owner], record_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await
            .unwrap_or_default()
        })
    }

    fn set_active<'a>(&'a self, hash: &'a KeyHash, active: bool) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let key = hash.clone();
            let changed = self
                .run("set_active", move |conn| {
                    conn.execute(
                        "UPDATE ApiKeys SET IsActive = ?2 WHERE HashedKey = ?1",
                        params![key.as_str(), active],
                    )
                })
                .await
                .unwrap_or(0);

            debug!(backend = "sqlite", hash = %hash.short(), active, changed, "Updated credential state");
            changed > 0
        })
    }
}
