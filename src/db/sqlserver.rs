//! Credential store on a hosted SQL Server instance, via tiberius.
//!
//! tiberius has no built-in pool; every operation opens a short-lived TDS
//! session over a fresh TCP stream.

use anyhow::Context;
use chrono::NaiveDateTime;
use tiberius::{Client, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::auth::hash_api_key;
use crate::db::admin::{sqlserver_identifier, sqlserver_literal};
use crate::db::connection::{ConnectionDescriptor, SqlServerDescriptor};
use crate::db::error::StoreError;
use crate::db::schema::{BackendKind, CredentialRecord};
use crate::db::store::{BoxFuture, CredentialStore, reject_credential_input};
use crate::types::{KeyHash, KeyOwner};

pub(crate) type SqlClient = Client<Compat<TcpStream>>;

const CREATE_TABLE: &str = "
IF NOT EXISTS (SELECT 1 FROM sys.tables WHERE name = N'api_keys')
BEGIN
    CREATE TABLE api_keys (
        id          INT IDENTITY(1,1) PRIMARY KEY,
        hashed_key  NVARCHAR(255) NOT NULL CONSTRAINT uq_api_keys_hashed_key UNIQUE,
        owner       NVARCHAR(100) NOT NULL,
        key_type    INT           NOT NULL DEFAULT 0,
        is_active   BIT           NOT NULL DEFAULT 1,
        created_ts  DATETIME      NOT NULL DEFAULT GETUTCDATE(),
        key_id      NVARCHAR(100) NULL
    );
    CREATE INDEX idx_api_keys_owner ON api_keys(owner);
END";

const CREATE_PROCEDURE: &str = "
CREATE OR ALTER PROCEDURE dbo.sp_InsertApiKey
    @owner      NVARCHAR(100),
    @hashed_key NVARCHAR(255),
    @key_type   INT
AS
BEGIN
    SET NOCOUNT ON;
    MERGE api_keys WITH (HOLDLOCK) AS target
    USING (SELECT @hashed_key AS hashed_key) AS source
        ON target.hashed_key = source.hashed_key
    WHEN MATCHED THEN
        UPDATE SET key_type = @key_type, is_active = 1
    WHEN NOT MATCHED THEN
        INSERT (hashed_key, owner, key_type, is_active)
        VALUES (@hashed_key, @owner, @key_type, 1);
END";

const INSERT_CALL: &str =
    "EXEC dbo.sp_InsertApiKey @owner = @P1, @hashed_key = @P2, @key_type = @P3";

const SELECT_COLUMNS: &str =
    "SELECT hashed_key, owner, key_type, is_active, key_id, created_ts FROM api_keys";

/// Open a TDS session for `descriptor`.
pub(crate) async fn connect(descriptor: &SqlServerDescriptor) -> anyhow::Result<SqlClient> {
    let config = descriptor
        .tiberius_config()
        .context("parsing SQL Server connection string")?;

    let tcp = TcpStream::connect(config.get_addr())
        .await
        .with_context(|| format!("connecting to {}", descriptor.server()))?;
    tcp.set_nodelay(true)?;

    let client = Client::connect(config, tcp.compat_write())
        .await
        .context("SQL Server login failed")?;
    Ok(client)
}

/// Batch that creates `database` when it does not exist yet.
pub(crate) fn create_database_sql(database: &str) -> String {
    format!(
        "IF DB_ID({}) IS NULL CREATE DATABASE {};",
        sqlserver_literal(database),
        sqlserver_identifier(database)
    )
}

/// Credential store on a SQL Server database.
pub struct SqlServerCredentialStore {
    descriptor: SqlServerDescriptor,
    database: String,
}

impl SqlServerCredentialStore {
    pub fn new(descriptor: SqlServerDescriptor) -> Result<Self, StoreError> {
        let database = descriptor
            .database()
            .map(str::to_string)
            .ok_or_else(|| StoreError::config("SQL Server credential store needs a database name"))?;

        Ok(Self {
            descriptor,
            database,
        })
    }

    pub fn descriptor(&self) -> &SqlServerDescriptor {
        &self.descriptor
    }

    async fn try_initialize(&self) -> anyhow::Result<()> {
        // Phase one runs against master on a clone; the bound descriptor
        // keeps pointing at the target database.
        let mut master = connect(&self.descriptor.master_scope()).await?;
        master
            .simple_query(create_database_sql(&self.database))
            .await?
            .into_results()
            .await
            .context("creating database")?;
        master.close().await.ok();

        let mut client = connect(&self.descriptor).await?;
        client
            .simple_query(CREATE_TABLE)
            .await?
            .into_results()
            .await
            .context("creating api_keys table")?;
        client
            .simple_query(CREATE_PROCEDURE)
            .await?
            .into_results()
            .await
            .context("creating dbo.sp_InsertApiKey")?;
        client.close().await.ok();
        Ok(())
    }

    async fn try_store(&self, hash: &KeyHash, owner: &str, key_type: i32) -> anyhow::Result<()> {
        let owner = owner.to_string();
        let hash = hash.as_str().to_string();

        let mut client = connect(&self.descriptor).await?;
        client
            .execute(INSERT_CALL, &[&owner, &hash, &key_type])
            .await?;
        Ok(())
    }

    async fn try_find(&self, hash: &KeyHash) -> anyhow::Result<Option<CredentialRecord>> {
        let hash = hash.as_str().to_string();
        let sql = format!("{} WHERE hashed_key = @P1 AND is_active = 1", SELECT_COLUMNS);

        let mut client = connect(&self.descriptor).await?;
        let row = client.query(sql, &[&hash]).await?.into_row().await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn try_list(&self, owner: &str) -> anyhow::Result<Vec<CredentialRecord>> {
        let owner = owner.to_string();
        let sql = format!(
            "{} WHERE owner = @P1 AND is_active = 1 ORDER BY id",
            SELECT_COLUMNS
        );

        let mut client = connect(&self.descriptor).await?;
        let rows = client.query(sql, &[&owner]).await?.into_first_result().await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn try_set_active(&self, hash: &KeyHash, active: bool) -> anyhow::Result<u64> {
        let hash = hash.as_str().to_string();

        let mut client = connect(&self.descriptor).await?;
        let result = client
            .execute(
                "UPDATE api_keys SET is_active = @P1 WHERE hashed_key = @P2",
                &[&active, &hash],
            )
            .await?;
        Ok(result.total())
    }
}

fn record_from_row(row: &Row) -> anyhow::Result<CredentialRecord> {
    let hash: &str = row
        .try_get("hashed_key")?
        .context("hashed_key is NULL")?;
    let owner: &str = row.try_get("owner")?.context("owner is NULL")?;
    let key_type: i32 = row.try_get("key_type")?.unwrap_or_default();
    let is_active: bool = row.try_get("is_active")?.unwrap_or(false);
    let external_id: Option<&str> = row.try_get("key_id")?;
    let created: Option<NaiveDateTime> = row.try_get("created_ts")?;

    Ok(CredentialRecord {
        hash: KeyHash::new(hash),
        owner: KeyOwner::new(owner),
        key_type,
        is_active,
        external_id: external_id.map(str::to_string),
        created_at: created.map(|naive| naive.and_utc()),
    })
}

impl CredentialStore for SqlServerCredentialStore {
    fn backend(&self) -> BackendKind {
        BackendKind::SqlServer
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
                    info!(server = %self.descriptor.server(), database = %self.database, "SQL Server credential schema ready");
                    true
                }
                Err(e) => {
                    warn!(backend = "sqlserver", error = %format!("{:#}", e), "Schema initialization failed");
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
                warn!(backend = "sqlserver", reason, "Refusing to store credential");
                return false;
            }

            let hash = hash_api_key(raw_key);
            match self.try_store(&hash, owner, key_type).await {
                Ok(()) => {
                    debug!(backend = "sqlserver", hash = %hash.short(), key_type, "Stored credential");
                    true
                }
                Err(e) => {
                    warn!(backend = "sqlserver", hash = %hash.short(), error = %format!("{:#}", e), "Failed to store credential");
                    false
                }
            }
        })
    }

    fn find_by_hash<'a>(&'a self, hash: &'a KeyHash) -> BoxFuture<'a, Option<CredentialRecord>> {
        Box::pin(async move {
            self.try_find(hash).await.unwrap_or_else(|e| {
                warn!(backend = "sqlserver", hash = %hash.short(), error = %format!("{:#}", e), "Credential lookup failed");
                None
            })
        })
    }

    fn list_by_owner<'a>(&'a self, owner: &'a str) -> BoxFuture<'a, Vec<CredentialRecord>> {
        Box::pin(async move {
            self.try_list(owner).await.unwrap_or_else(|e| {
                warn!(backend = "sqlserver", owner, error = %format!("{:#}", e), "Listing credentials failed");
                Vec::new()
            })
        })
    }

    fn set_active<'a>(&'a self, hash: &'a KeyHash, active: bool) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match self.try_set_active(hash, active).await {
                Ok(changed) => changed > 0,
                Err(e) => {
                    warn!(backend = "sqlserver", hash = %hash.short(), error = %format!("{:#}", e), "Updating credential state failed");
                    false
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::SqlServerAuth;

    #[test]
    fn test_create_database_sql_escapes() {
        assert_eq!(
            create_database_sql("ApiCore"),
            "IF DB_ID(N'ApiCore') IS NULL CREATE DATABASE [ApiCore];"
        );
        assert_eq!(
            create_database_sql("o'b]x"),
            "IF DB_ID(N'o''b]x') IS NULL CREATE DATABASE [o'b]]x];"
        );
    }

    #[test]
    fn test_procedure_keeps_owner_on_conflict() {
        let matched = CREATE_PROCEDURE
            .split("WHEN NOT MATCHED")
            .next()
            .unwrap();
        assert!(matched.contains("is_active = 1"));
        assert!(!matched.contains("owner ="));
        assert!(CREATE_PROCEDURE.starts_with("\nCREATE OR ALTER PROCEDURE"));
    }

    #[test]
    fn test_store_keeps_target_database() {
        let descriptor = SqlServerDescriptor::new("sql01", SqlServerAuth::sql(Some("sa".to_string()), Some("pw".to_string())).unwrap())
            .unwrap()
            .with_database(Some("Keys".to_string()));
        let store = SqlServerCredentialStore::new(descriptor).unwrap();

        assert_eq!(store.database_name().as_deref(), Some("Keys"));
        assert_eq!(store.descriptor().database(), Some("Keys"));
        assert_eq!(store.descriptor().master_scope().database(), Some("master"));
    }

    #[test]
    fn test_store_requires_database() {
        let descriptor = SqlServerDescriptor::new("sql01", SqlServerAuth::sql(Some("sa".to_string()), Some("pw".to_string())).unwrap())
            .unwrap()
            .with_database(None);
        assert!(SqlServerCredentialStore::new(descriptor).is_err());
    }

    /// Needs a reachable instance: KEYGATE_TEST_MSSQL_SERVER (e.g. `localhost,1433`),
    /// KEYGATE_TEST_MSSQL_USER and KEYGATE_TEST_MSSQL_PASSWORD.
    #[tokio::test]
    #[ignore]
    async fn test_live_store_contract() {
        let Ok(server) = std::env::var("KEYGATE_TEST_MSSQL_SERVER") else {
            return;
        };
        let auth = SqlServerAuth::sql(
            std::env::var("KEYGATE_TEST_MSSQL_USER").ok(),
            std::env::var("KEYGATE_TEST_MSSQL_PASSWORD").ok(),
        )
        .unwrap();
        let descriptor = SqlServerDescriptor::new(server, auth)
            .unwrap()
            .with_database(Some("KeygateTest".to_string()));
        let store = SqlServerCredentialStore::new(descriptor).unwrap();
        crate::db::store::contract::exercise(&store).await;
    }
}
