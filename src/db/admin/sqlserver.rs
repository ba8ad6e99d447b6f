use tracing::{info, warn};

use super::{
    ServerAdministrator, UserPrivileges, invalid_name, sqlserver_identifier, sqlserver_literal,
};
use crate::db::connection::SqlServerDescriptor;
use crate::db::schema::BackendKind;
use crate::db::sqlserver::connect;
use crate::db::store::BoxFuture;

/// Login, user and database administration on SQL Server.
///
/// Pinned to `master` whatever database the given descriptor names.
#[derive(Debug, Clone)]
pub struct SqlServerAdmin {
    descriptor: SqlServerDescriptor,
}

/// Batch that creates the login and, with a database, the mapped user and
/// its role memberships.
fn create_user_batch(
    username: &str,
    password: &str,
    privileges: UserPrivileges,
    database: Option<&str>,
) -> Option<String> {
    let login = sqlserver_identifier(username);
    let name = sqlserver_literal(username);

    let mut batch = format!(
        "IF NOT EXISTS (SELECT 1 FROM sys.server_principals WHERE name = {name})\n    CREATE LOGIN {login} WITH PASSWORD = {password};\n",
        password = sqlserver_literal(password),
    );

    if let Some(database) = database {
        let roles = privileges.sqlserver_roles()?;
        batch.push_str(&format!("USE {};\n", sqlserver_identifier(database)));
        batch.push_str(&format!(
            "IF NOT EXISTS (SELECT 1 FROM sys.database_principals WHERE name = {name})\n    CREATE USER {login} FOR LOGIN {login};\n"
        ));
        for role in roles {
            batch.push_str(&format!("ALTER ROLE {} ADD MEMBER {};\n", role, login));
        }
    } else if privileges == UserPrivileges::None {
        return None;
    } else if privileges == UserPrivileges::Admin {
        batch.push_str(&format!("ALTER SERVER ROLE sysadmin ADD MEMBER {};\n", login));
    }

    Some(batch)
}

/// Batch that drops the user from every online user database, then the login.
fn delete_user_batch(username: &str) -> String {
    format!(
        "DECLARE @login sysname = {name};
DECLARE @sql NVARCHAR(MAX) = N'';
SELECT @sql += N'USE ' + QUOTENAME(name) + N'; IF EXISTS (SELECT 1 FROM sys.database_principals WHERE name = '
    + QUOTENAME(@login, '''') + N') DROP USER ' + QUOTENAME(@login) + N';'
FROM sys.databases
WHERE state_desc = 'ONLINE' AND name NOT IN ('master', 'tempdb', 'model', 'msdb');
EXEC sp_executesql @sql;
IF EXISTS (SELECT 1 FROM sys.server_principals WHERE name = @login)
    EXEC (N'DROP LOGIN ' + QUOTENAME(@login));",
        name = sqlserver_literal(username)
    )
}

fn list_users_sql(database: &str) -> String {
    format!(
        "SELECT dp.name FROM {}.sys.database_principals AS dp \
         WHERE dp.type IN ('S', 'U') AND dp.principal_id > 4 ORDER BY dp.name",
        sqlserver_identifier(database)
    )
}

fn delete_database_batch(database: &str) -> String {
    let ident = sqlserver_identifier(database);
    format!(
        "IF DB_ID({}) IS NOT NULL\nBEGIN\n    ALTER DATABASE {ident} SET SINGLE_USER WITH ROLLBACK IMMEDIATE;\n    DROP DATABASE {ident};\nEND",
        sqlserver_literal(database),
    )
}

impl SqlServerAdmin {
    pub fn new(descriptor: SqlServerDescriptor) -> Self {
        Self {
            descriptor: descriptor.master_scope(),
        }
    }

    async fn run(&self, batch: String) -> anyhow::Result<()> {
        let mut client = connect(&self.descriptor).await?;
        client.simple_query(batch).await?.into_results().await?;
        client.close().await.ok();
        Ok(())
    }

    async fn try_list_users(&self, database: &str) -> anyhow::Result<Vec<String>> {
        let mut client = connect(&self.descriptor).await?;
        let rows = client
            .simple_query(list_users_sql(database))
            .await?
            .into_first_result()
            .await?;
        client.close().await.ok();

        let mut users = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(name) = row.try_get::<&str, _>(0)? {
                users.push(name.to_string());
            }
        }
        Ok(users)
    }
}

impl ServerAdministrator for SqlServerAdmin {
    fn backend(&self) -> BackendKind {
        BackendKind::SqlServer
    }

    fn create_user<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
        privileges: UserPrivileges,
        database: Option<&'a str>,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if invalid_name(username) || database.is_some_and(invalid_name) {
                warn!(backend = "sqlserver", "Refusing to create user with an empty name");
                return false;
            }

            let Some(batch) = create_user_batch(username, password, privileges, database) else {
                warn!(backend = "sqlserver", user = username, %privileges, "No role for requested privilege level");
                return false;
            };

            match self.run(batch).await {
                Ok(()) => {
                    info!(backend = "sqlserver", user = username, %privileges, database = ?database, "Created login");
                    true
                }
                Err(e) => {
                    warn!(backend = "sqlserver", user = username, error = %format!("{:#}", e), "Failed to create login");
                    false
                }
            }
        })
    }

    fn delete_user<'a>(&'a self, username: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if invalid_name(username) {
                return false;
            }

            match self.run(delete_user_batch(username)).await {
                Ok(()) => {
                    info!(backend = "sqlserver", user = username, "Deleted login");
                    true
                }
                Err(e) => {
                    warn!(backend = "sqlserver", user = username, error = %format!("{:#}", e), "Failed to delete login");
                    false
                }
            }
        })
    }

    fn list_users<'a>(&'a self, database: &'a str) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async move {
            if invalid_name(database) {
                return Vec::new();
            }

            self.try_list_users(database).await.unwrap_or_else(|e| {
                warn!(backend = "sqlserver", database, error = %format!("{:#}", e), "Failed to list users");
                Vec::new()
            })
        })
    }

    fn delete_database<'a>(&'a self, database: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if invalid_name(database) {
                return false;
            }

            match self.run(delete_database_batch(database)).await {
                Ok(()) => {
                    info!(backend = "sqlserver", database, "Dropped database");
                    true
                }
                Err(e) => {
                    warn!(backend = "sqlserver", database, error = %format!("{:#}", e), "Failed to drop database");
                    false
                }
            }
        })
    }
}
