//! Credential store on a hosted MySQL server, via sqlx.

use std::time::Duration;

use anyhow::Context;
use sqlx::Row;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::auth::hash_api_key;
use crate::db::admin::mysql_identifier;
use crate::db::connection::{ConnectionDescriptor, MySqlDescriptor};
use crate::db::error::StoreError;
use crate::db::schema::{BackendKind, CredentialRecord};
use crate::db::store::{BoxFuture, CredentialStore, reject_credential_input};
use crate::types::{KeyHash, KeyOwner};

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS api_keys (
        id          INT AUTO_INCREMENT PRIMARY KEY,
        hashed_key  VARCHAR(255) NOT NULL,
        owner       VARCHAR(100) NOT NULL,
        key_type    INT          NOT NULL DEFAULT 0,
        is_active   BOOLEAN      NOT NULL DEFAULT TRUE,
        created_ts  TIMESTAMP    NULL DEFAULT CURRENT_TIMESTAMP,
        key_id      VARCHAR(100) NULL,
        CONSTRAINT uq_api_key UNIQUE (hashed_key),
        INDEX idx_api_keys_owner (owner)
    )";

const DROP_PROCEDURE: &str = "DROP PROCEDURE IF EXISTS sp_add_api_key";

const CREATE_PROCEDURE: &str = "
    CREATE PROCEDURE sp_add_api_key(
        IN p_owner      VARCHAR(100),
        IN p_hashed_key VARCHAR(255),
        IN p_key_type   INT
    )
    BEGIN
        INSERT INTO api_keys (owner, hashed_key, key_type, is_active)
        VALUES (p_owner, p_hashed_key, p_key_type, TRUE)
        ON DUPLICATE KEY UPDATE key_type = p_key_type, is_active = TRUE;
    END";

const SELECT_COLUMNS: &str =
    "SELECT hashed_key, owner, key_type, is_active, key_id, created_ts FROM api_keys";

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// `CREATE DATABASE` statement for the target schema.
pub(crate) fn create_database_sql(database: &str) -> String {
    format!(
        "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
        mysql_identifier(database)
    )
}

/// One-connection pool for short server-level work such as `CREATE DATABASE`
/// or account management. Close it when done.
pub(crate) async fn single_session(descriptor: &MySqlDescriptor) -> anyhow::Result<MySqlPool> {
    MySqlPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(descriptor.connect_options())
        .await
        .with_context(|| format!("connecting to MySQL server {}", descriptor.server()))
}

/// Credential store on a MySQL database.
pub struct MySqlCredentialStore {
    descriptor: MySqlDescriptor,
    database: String,
    pool: OnceCell<MySqlPool>,
}

impl MySqlCredentialStore {
    /// Bind a store to `descriptor`. The pool is built on first use, so this
    /// works without a running Tokio runtime.
    pub fn new(descriptor: MySqlDescriptor) -> Result<Self, StoreError> {
        let database = descriptor
            .database()
            .map(str::to_string)
            .ok_or_else(|| StoreError::config("MySQL credential store needs a database name"))?;

        Ok(Self {
            descriptor,
            database,
            pool: OnceCell::new(),
        })
    }

    pub fn descriptor(&self) -> &MySqlDescriptor {
        &self.descriptor
    }

    async fn pool(&self) -> &MySqlPool {
        self.pool
            .get_or_init(|| async {
                MySqlPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect_lazy_with(self.descriptor.connect_options())
            })
            .await
    }

    async fn try_initialize(&self) -> anyhow::Result<()> {
        // The target database may not exist yet, so create it over a
        // server-scoped session first.
        let server = single_session(&self.descriptor.server_scope()).await?;
        let created = sqlx::raw_sql(&create_database_sql(&self.database))
            .execute(&server)
            .await
            .context("creating database");
        server.close().await;
        created?;

        let pool = self.pool().await;
        for statement in [CREATE_TABLE, DROP_PROCEDURE, CREATE_PROCEDURE] {
            sqlx::raw_sql(statement)
                .execute(pool)
                .await
                .context("creating credential schema")?;
        }
        Ok(())
    }

    async fn try_store(&self, hash: &KeyHash, owner: &str, key_type: i32) -> anyhow::Result<()> {
        sqlx::query("CALL sp_add_api_key(?, ?, ?)")
            .bind(owner)
            .bind(hash.as_str())
            .bind(key_type)
            .execute(self.pool().await)
            .await?;
        Ok(())
    }

    async fn try_find(&self, hash: &KeyHash) -> anyhow::Result<Option<CredentialRecord>> {
        let row = sqlx::query(&format!(
            "{} WHERE hashed_key = ? AND is_active = TRUE",
            SELECT_COLUMNS
        ))
        .bind(hash.as_str())
        .fetch_optional(self.pool().await)
        .await?;

        row.as_ref().map(record_from_row).transpose().map_err(Into::into)
    }

    async fn try_list(&self, owner: &str) -> anyhow::Result<Vec<CredentialRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE owner = ? AND is_active = TRUE ORDER BY id",
            SELECT_COLUMNS
        ))
        .bind(owner)
        .fetch_all(self.pool().await)
        .await?;

        rows.iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn try_set_active(&self, hash: &KeyHash, active: bool) -> anyhow::Result<u64> {
        let result = sqlx::query("UPDATE api_keys SET is_active = ? WHERE hashed_key = ?")
            .bind(active)
            .bind(hash.as_str())
            .execute(self.pool().await)
            .await?;
        Ok(result.rows_affected())
    }
}

fn record_from_row(row: &MySqlRow) -> Result<CredentialRecord, sqlx::Error> {
    Ok(CredentialRecord {
        hash: KeyHash::new(row.try_get::<String, _>("hashed_key")?),
        owner: KeyOwner::new(row.try_get::<String, _>("owner")?),
        key_type: row.try_get("key_type")?,
        is_active: row.try_get("is_active")?,
        external_id: row.try_get("key_id")?,
        created_at: row.try_get("created_ts")?,
    })
}

impl CredentialStore for MySqlCredentialStore {
    fn backend(&self) -> BackendKind {
        BackendKind::MySql
    }

    fn database_name(&self) -> Option<String> {
        Some(self.database.clone())
    }

    fn connection_string(&self) -> String {
        self.descriptor.connection_string()
    }

    fn initialize_schema(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            match self.try_initialize().await {
                Ok(()) => {
                    info!(server = %self.descriptor.server(), database = %self.database, "MySQL credential schema ready");
                    true
                }
                Err(e) => {
                    warn!(backend = "mysql", error = %format!("{:#}", e), "Schema initialization failed");
                    false
                }
            }
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
                warn!(backend = "mysql", reason, "Refusing to store credential");
                return false;
            }

            let hash = hash_api_key(raw_key);
            match self.try_store(&hash, owner, key_type).await {
                Ok(()) => {
                    debug!(backend = "mysql", hash = %hash.short(), key_type, "Stored credential");
                    true
                }
                Err(e) => {
                    warn!(backend = "mysql", hash = %hash.short(), error = %e, "Failed to store credential");
                    false
                }
            }
        })
    }

    fn find_by_hash<'a>(&'a self, hash: &'a KeyHash) -> BoxFuture<'a, Option<CredentialRecord>> {
        Box::pin(async move {
            self.try_find(hash).await.unwrap_or_else(|e| {
                warn!(backend = "mysql", hash = %hash.short(), error = %e, "Credential lookup failed");
                None
            })
        })
    }

    fn list_by_owner<'a>(&'a self, owner: &'a str) -> BoxFuture<'a, Vec<CredentialRecord>> {
        Box::pin(async move {
            self.try_list(owner).await.unwrap_or_else(|e| {
                warn!(backend = "mysql", owner, error = %e, "Listing credentials failed");
                Vec::new()
            })
        })
    }

    fn set_active<'a>(&'a self, hash: &'a KeyHash, active: bool) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match self.try_set_active(hash, active).await {
                Ok(changed) => changed > 0,
                Err(e) => {
                    warn!(backend = "mysql", hash = %hash.short(), error = %e, "Updating credential state failed");
                    false
                }
            }
        })
    }
}
