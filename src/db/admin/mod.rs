//! Server-level administration: login/user provisioning and database removal.
//!
//! Every user-supplied name or secret is embedded in DDL through the escaping
//! helpers below; engines do not accept bind parameters for identifiers.

mod mysql;
mod sqlite;
mod sqlserver;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::connection::HostedDescriptor;
use crate::db::schema::BackendKind;
use crate::db::store::BoxFuture;

pub use mysql::MySqlServerAdmin;
pub use sqlite::SqliteAdmin;
pub use sqlserver::SqlServerAdmin;

/// Abstract privilege level, translated per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserPrivileges {
    None,
    Read,
    Write,
    ReadWrite,
    Admin,
}

impl UserPrivileges {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "readwrite",
            Self::Admin => "admin",
        }
    }

    /// MySQL privilege list for `GRANT`. `None` has no translation.
    pub fn mysql_grants(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Read => Some("SELECT"),
            Self::Write => Some("INSERT, UPDATE"),
            Self::ReadWrite => Some("SELECT, INSERT, UPDATE"),
            Self::Admin => Some("ALL PRIVILEGES"),
        }
    }

    /// SQL Server fixed database roles. `None` has no translation.
    pub fn sqlserver_roles(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::None => None,
            Self::Read => Some(&["db_datareader"]),
            Self::Write => Some(&["db_datawriter"]),
            Self::ReadWrite => Some(&["db_datareader", "db_datawriter"]),
            Self::Admin => Some(&["db_owner"]),
        }
    }
}

impl fmt::Display for UserPrivileges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserPrivileges {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "readwrite" | "read-write" | "rw" => Ok(Self::ReadWrite),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown privilege level: {}", other)),
        }
    }
}

/// Administrative operations against a hosted server.
///
/// Like the stores, failures are logged and reported as `false` or an empty
/// list.
pub trait ServerAdministrator: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Create a login/user and grant `privileges`, either server-wide
    /// (`database == None`) or on one database.
    fn create_user<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
        privileges: UserPrivileges,
        database: Option<&'a str>,
    ) -> BoxFuture<'a, bool>;

    /// Remove the login/user everywhere it exists.
    fn delete_user<'a>(&'a self, username: &'a str) -> BoxFuture<'a, bool>;

    /// Principals that hold access to `database`.
    fn list_users<'a>(&'a self, database: &'a str) -> BoxFuture<'a, Vec<String>>;

    /// Drop `database`, disconnecting other sessions where the engine
    /// requires it.
    fn delete_database<'a>(&'a self, database: &'a str) -> BoxFuture<'a, bool>;
}

/// Administrator for a hosted descriptor.
pub fn server_admin(descriptor: HostedDescriptor) -> Arc<dyn ServerAdministrator> {
    match descriptor {
        HostedDescriptor::MySql(d) => Arc::new(MySqlServerAdmin::new(d)),
        HostedDescriptor::SqlServer(d) => Arc::new(SqlServerAdmin::new(d)),
    }
}

/// Names the admin operations refuse outright.
pub(crate) fn invalid_name(name: &str) -> bool {
    name.trim().is_empty() || name.contains('\0')
}

/// Backtick-quoted MySQL identifier.
pub fn mysql_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Single-quoted MySQL string literal.
pub fn mysql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Bracket-quoted SQL Server identifier.
pub fn sqlserver_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Unicode SQL Server string literal.
pub fn sqlserver_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}
