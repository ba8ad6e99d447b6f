use sqlx::Row;
use tracing::{info, warn};

use super::{ServerAdministrator, UserPrivileges, invalid_name, mysql_identifier, mysql_literal};
use crate::db::connection::MySqlDescriptor;
use crate::db::mysql::single_session;
use crate::db::schema::BackendKind;
use crate::db::store::BoxFuture;

/// Account and database administration on a MySQL server.
///
/// Always connects without a default database.
#[derive(Debug, Clone)]
pub struct MySqlServerAdmin {
    descriptor: MySqlDescriptor,
}

fn account(username: &str, host: &str) -> String {
    format!("{}@{}", mysql_literal(username), mysql_literal(host))
}

/// Statements that create `username` and grant `privileges`.
fn create_user_statements(
    username: &str,
    password: &str,
    host: &str,
    privileges: UserPrivileges,
    database: Option<&str>,
) -> Option<Vec<String>> {
    let grants = privileges.mysql_grants()?;
    let scope = match database {
        Some(db) => format!("{}.*", mysql_identifier(db)),
        None => "*.*".to_string(),
    };
    let account = account(username, host);

    Some(vec![
        format!(
            "CREATE USER IF NOT EXISTS {} IDENTIFIED BY {}",
            account,
            mysql_literal(password)
        ),
        format!("GRANT {} ON {} TO {}", grants, scope, account),
        "FLUSH PRIVILEGES".to_string(),
    ])
}

/// User part of an `INFORMATION_SCHEMA` grantee such as `'app'@'%'`.
fn grantee_user(grantee: &str) -> Option<String> {
    let (user, _host) = grantee.rsplit_once('@')?;
    let user = user.strip_prefix('\'')?.strip_suffix('\'')?;
    Some(user.replace("''", "'"))
}

impl MySqlServerAdmin {
    pub fn new(descriptor: MySqlDescriptor) -> Self {
        Self {
            descriptor: descriptor.server_scope(),
        }
    }

    async fn run(&self, statements: &[String]) -> anyhow::Result<()> {
        let session = single_session(&self.descriptor).await?;
        let mut result: anyhow::Result<()> = Ok(());
        for statement in statements {
            if let Err(e) = sqlx::raw_sql(statement).execute(&session).await {
                result = Err(e.into());
                break;
            }
        }
        session.close().await;
        result
    }

    async fn try_list_users(&self, database: &str) -> anyhow::Result<Vec<String>> {
        let session = single_session(&self.descriptor).await?;
        let rows = sqlx::query(
            "SELECT DISTINCT GRANTEE FROM INFORMATION_SCHEMA.SCHEMA_PRIVILEGES WHERE TABLE_SCHEMA = ?",
        )
        .bind(database)
        .fetch_all(&session)
        .await;
        session.close().await;
        let rows = rows?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            let grantee: String = row.try_get("GRANTEE")?;
            users.push(grantee_user(&grantee).unwrap_or(grantee));
        }
        users.sort();
        users.dedup();
        Ok(users)
    }
}

impl ServerAdministrator for MySqlServerAdmin {
    fn backend(&self) -> BackendKind {
        BackendKind::MySql
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
                warn!(backend = "mysql", "Refusing to create user with an empty name");
                return false;
            }

            let host = self.descriptor.account_host();
            let Some(statements) =
                create_user_statements(username, password, host, privileges, database)
            else {
                warn!(backend = "mysql", user = username, %privileges, "No grant for requested privilege level");
                return false;
            };

            match self.run(&statements).await {
                Ok(()) => {
                    info!(backend = "mysql", user = username, %privileges, database = ?database, "Created user");
                    true
                }
                Err(e) => {
                    warn!(backend = "mysql", user = username, error = %format!("{:#}", e), "Failed to create user");
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

            let statements = vec![
                format!(
                    "DROP USER IF EXISTS {}",
                    account(username, self.descriptor.account_host())
                ),
                "FLUSH PRIVILEGES".to_string(),
            ];

            match self.run(&statements).await {
                Ok(()) => {
                    info!(backend = "mysql", user = username, "Deleted user");
                    true
                }
                Err(e) => {
                    warn!(backend = "mysql", user = username, error = %format!("{:#}", e), "Failed to delete user");
                    false
                }
            }
        })
    }

    fn list_users<'a>(&'a self, database: &'a str) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.try_list_users(database).await.unwrap_or_else(|e| {
                warn!(backend = "mysql", database, error = %format!("{:#}", e), "Failed to list users");
                Vec::new()
            })
        })
    }

    fn delete_database<'a>(&'a self, database: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if invalid_name(database) {
                return false;
            }

            let statements = vec![format!("DROP DATABASE IF EXISTS {}", mysql_identifier(database))];
            match self.run(&statements).await {
                Ok(()) => {
                    info!(backend = "mysql", database, "Dropped database");
                    true
                }
                Err(e) => {
                    warn!(backend = "mysql", database, error = %format!("{:#}", e), "Failed to drop database");
                    false
                }
            }
        })
    }
}
