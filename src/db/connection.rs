//! Backend connection descriptors.
//!
//! Each descriptor carries the structured parameters for one engine and
//! renders them into that engine's native connection string. Required values
//! are checked when the descriptor is built, never on first use.

use std::fmt;
use std::path::{Path, PathBuf};

use sqlx::mysql::MySqlConnectOptions;

use crate::db::error::StoreError;
use crate::db::schema::{BackendKind, DEFAULT_DATABASE_NAME};

/// Default SQLite file name inside the data directory.
pub const DEFAULT_SQLITE_FILE: &str = "ApiCore.db";

/// Default MySQL TCP port.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// SQL Server system database used for server-level statements.
pub const SQLSERVER_MASTER_DATABASE: &str = "master";

/// Common surface of every backend descriptor.
pub trait ConnectionDescriptor: Send + Sync {
    /// Engine this descriptor targets.
    fn backend(&self) -> BackendKind;

    /// Fully-qualified connection string in the engine's own dialect.
    ///
    /// Hosted strings contain credentials; never log them.
    fn connection_string(&self) -> String;

    /// Target database (file name for the embedded backend).
    fn database(&self) -> Option<&str>;

    /// Point the descriptor at another database.
    fn set_database(&mut self, database: Option<String>);
}

/// Quote an ADO.NET style value when it would otherwise break parsing.
fn ado_value(value: &str) -> String {
    let needs_quotes = value.contains(';')
        || value.contains('"')
        || value.contains('\'')
        || value.trim() != value;

    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Embedded (SQLite)
// ---------------------------------------------------------------------------

/// Platform default directory for the embedded database.
#[cfg(windows)]
fn platform_data_directory() -> Option<PathBuf> {
    Some(PathBuf::from(r"C:\ProgramData\ApiCore\Data"))
}

#[cfg(target_os = "linux")]
fn platform_data_directory() -> Option<PathBuf> {
    Some(PathBuf::from("/var/lib/apicore/data"))
}

#[cfg(not(any(windows, target_os = "linux")))]
fn platform_data_directory() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("ApiCore").join("Data"))
}

/// Location of the embedded database file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteLocation {
    directory: PathBuf,
    file_name: String,
}

impl SqliteLocation {
    /// Resolve the storage directory, creating it when missing.
    ///
    /// An explicit directory wins; otherwise the platform default data
    /// directory is used.
    pub fn new(directory: Option<PathBuf>) -> Result<Self, StoreError> {
        let directory = match directory {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => platform_data_directory().ok_or_else(|| {
                StoreError::config("no database directory set and no platform default available")
            })?,
        };

        std::fs::create_dir_all(&directory).map_err(|e| {
            StoreError::Io(format!(
                "failed to create database directory {}: {}",
                directory.display(),
                e
            ))
        })?;

        Ok(Self {
            directory,
            file_name: DEFAULT_SQLITE_FILE.to_string(),
        })
    }

    /// Use a different file name inside the same directory.
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Directory holding the database file.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Full path of the database file.
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

impl ConnectionDescriptor for SqliteLocation {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn connection_string(&self) -> String {
        format!("Data Source={}", self.path().display())
    }

    fn database(&self) -> Option<&str> {
        Some(&self.file_name)
    }

    fn set_database(&mut self, database: Option<String>) {
        self.file_name = database
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_SQLITE_FILE.to_string());
    }
}

// ---------------------------------------------------------------------------
// Hosted engine A (MySQL)
// ---------------------------------------------------------------------------

/// Connection parameters for a MySQL server.
#[derive(Clone, PartialEq, Eq)]
pub struct MySqlDescriptor {
    server: String,
    port: Option<u16>,
    database: Option<String>,
    user: String,
    password: String,
}

impl MySqlDescriptor {
    /// Descriptor for `localhost:3306`, database `ApiCore`.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Result<Self, StoreError> {
        let user = user.into();
        let password = password.into();

        if user.trim().is_empty() || password.is_empty() {
            return Err(StoreError::config(
                "MySQL user name or password is missing or empty",
            ));
        }

        Ok(Self {
            server: "localhost".to_string(),
            port: Some(DEFAULT_MYSQL_PORT),
            database: Some(DEFAULT_DATABASE_NAME.to_string()),
            user,
            password,
        })
    }

    /// Descriptor addressing the server instance itself (no database),
    /// for server-level administration.
    pub fn server_connection(
        user: impl Into<String>,
        password: impl Into<String>,
        server: Option<String>,
        port: Option<u16>,
    ) -> Result<Self, StoreError> {
        let mut conn = Self::new(user, password)?;
        if let Some(server) = server.filter(|s| !s.is_empty()) {
            conn.server = server;
        }
        conn.port = port;
        conn.database = None;
        Ok(conn)
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_database(mut self, database: Option<String>) -> Self {
        self.database = database.filter(|db| !db.is_empty());
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Same server and credentials, without a target database.
    pub fn server_scope(&self) -> Self {
        Self {
            database: None,
            ..self.clone()
        }
    }

    /// Host part used in `'user'@'host'` account names.
    pub fn account_host(&self) -> &'static str {
        if self.server.eq_ignore_ascii_case("localhost") {
            "localhost"
        } else {
            "%"
        }
    }

    /// Driver options equivalent to [`ConnectionDescriptor::connection_string`].
    pub fn connect_options(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.server)
            .username(&self.user)
            .password(&self.password);

        if let Some(port) = self.port {
            options = options.port(port);
        }

        if let Some(database) = &self.database {
            options = options.database(database);
        }

        options
    }
}

impl fmt::Debug for MySqlDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlDescriptor")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ConnectionDescriptor for MySqlDescriptor {
    fn backend(&self) -> BackendKind {
        BackendKind::MySql
    }

    fn connection_string(&self) -> String {
        let mut out = format!("Server={};", ado_value(&self.server));

        if let Some(port) = self.port {
            out.push_str(&format!("Port={};", port));
        }

        if let Some(database) = &self.database {
            out.push_str(&format!("Database={};", ado_value(database)));
        }

        out.push_str(&format!(
            "User={};Password={};",
            ado_value(&self.user),
            ado_value(&self.password)
        ));
        out
    }

    fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    fn set_database(&mut self, database: Option<String>) {
        self.database = database.filter(|db| !db.is_empty());
    }
}

// ---------------------------------------------------------------------------
// Hosted engine B (SQL Server)
// ---------------------------------------------------------------------------

/// Whether this build can log in to SQL Server with integrated authentication.
///
/// tiberius only carries it on Windows here (`winauth`).
pub const INTEGRATED_AUTH_SUPPORTED: bool = cfg!(windows);

/// How a SQL Server connection authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum SqlServerAuth {
    /// SQL Server login with user name and password.
    Sql { user: String, password: String },
    /// Integrated / trusted (Windows or Kerberos) authentication.
    Integrated,
}

impl SqlServerAuth {
    /// SQL authentication; both parts are required.
    pub fn sql(user: Option<String>, password: Option<String>) -> Result<Self, StoreError> {
        match (user, password) {
            (Some(user), Some(password)) if !user.trim().is_empty() && !password.is_empty() => {
                Ok(Self::Sql { user, password })
            }
            _ => Err(StoreError::config(
                "SQL authentication selected but user id or password is missing",
            )),
        }
    }

    /// Parse the configured mode name (`sql` or `integrated`).
    pub fn from_mode(
        mode: &str,
        user: Option<String>,
        password: Option<String>,
    ) -> Result<Self, StoreError> {
        match mode.to_ascii_lowercase().as_str() {
            "sql" | "sqlauthentication" => Self::sql(user, password),
            "integrated" | "windows" | "trusted" | "windowsauthentication" => Ok(Self::Integrated),
            other => Err(StoreError::config(format!(
                "invalid SQL Server authentication mode: {}",
                other
            ))),
        }
    }
}

impl fmt::Debug for SqlServerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql { user, .. } => f
                .debug_struct("Sql")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Self::Integrated => f.write_str("Integrated"),
        }
    }
}

/// Connection parameters for a SQL Server instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlServerDescriptor {
    server: String,
    database: Option<String>,
    auth: SqlServerAuth,
    trust_server_certificate: bool,
}

impl SqlServerDescriptor {
    /// Descriptor for `server` with database `ApiCore`.
    pub fn new(server: impl Into<String>, auth: SqlServerAuth) -> Result<Self, StoreError> {
        let server = server.into();
        if server.trim().is_empty() {
            return Err(StoreError::config("SQL Server instance name is missing"));
        }
        if auth == SqlServerAuth::Integrated && !INTEGRATED_AUTH_SUPPORTED {
            return Err(StoreError::config(
                "integrated SQL Server authentication is not supported on this platform",
            ));
        }

        Ok(Self {
            server,
            database: Some(DEFAULT_DATABASE_NAME.to_string()),
            auth,
            trust_server_certificate: true,
        })
    }

    pub fn with_database(mut self, database: Option<String>) -> Self {
        self.database = database.filter(|db| !db.is_empty());
        self
    }

    pub fn with_trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn auth(&self) -> &SqlServerAuth {
        &self.auth
    }

    /// Database the connection string will actually name.
    pub fn effective_database(&self) -> &str {
        self.database.as_deref().unwrap_or(SQLSERVER_MASTER_DATABASE)
    }

    /// Same server and credentials, pointed at `master`.
    pub fn master_scope(&self) -> Self {
        Self {
            database: Some(SQLSERVER_MASTER_DATABASE.to_string()),
            ..self.clone()
        }
    }

    /// Driver configuration parsed from the rendered connection string, with
    /// the login method set from `auth`.
    pub fn tiberius_config(&self) -> tiberius::Result<tiberius::Config> {
        let mut config = tiberius::Config::from_ado_string(&self.connection_string())?;
        match &self.auth {
            SqlServerAuth::Sql { user, password } => {
                config.authentication(tiberius::AuthMethod::sql_server(user, password));
            }
            #[cfg(windows)]
            SqlServerAuth::Integrated => config.authentication(tiberius::AuthMethod::Integrated),
            #[cfg(not(windows))]
            SqlServerAuth::Integrated => {
                return Err(tiberius::error::Error::Protocol(
                    "integrated authentication is not available in this build".into(),
                ));
            }
        }
        Ok(config)
    }
}

impl ConnectionDescriptor for SqlServerDescriptor {
    fn backend(&self) -> BackendKind {
        BackendKind::SqlServer
    }

    fn connection_string(&self) -> String {
        let mut parts = vec![
            format!("Server={}", ado_value(&self.server)),
            format!("Database={}", ado_value(self.effective_database())),
        ];

        match &self.auth {
            SqlServerAuth::Sql { user, password } => {
                parts.push(format!("User Id={}", ado_value(user)));
                parts.push(format!("Password={}", ado_value(password)));
            }
            SqlServerAuth::Integrated => {
                parts.push("Integrated Security=True".to_string());
                parts.push("Trusted_Connection=True".to_string());
            }
        }

        parts.push(format!(
            "TrustServerCertificate={}",
            if self.trust_server_certificate { "True" } else { "False" }
        ));

        parts.join(";")
    }

    fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    fn set_database(&mut self, database: Option<String>) {
        self.database = database.filter(|db| !db.is_empty());
    }
}

/// Descriptor for one of the hosted engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostedDescriptor {
    MySql(MySqlDescriptor),
    SqlServer(SqlServerDescriptor),
}

impl HostedDescriptor {
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::MySql(_) => BackendKind::MySql,
            Self::SqlServer(_) => BackendKind::SqlServer,
        }
    }

    pub fn as_descriptor(&self) -> &dyn ConnectionDescriptor {
        match self {
            Self::MySql(d) => d,
            Self::SqlServer(d) => d,
        }
    }
}

impl From<MySqlDescriptor> for HostedDescriptor {
    fn from(descriptor: MySqlDescriptor) -> Self {
        Self::MySql(descriptor)
    }
}

impl From<SqlServerDescriptor> for HostedDescriptor {
    fn from(descriptor: SqlServerDescriptor) -> Self {
        Self::SqlServer(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_location_explicit_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("data");

        let location = SqliteLocation::new(Some(dir.clone())).unwrap();
        assert!(dir.exists());
        assert_eq!(location.path(), dir.join(DEFAULT_SQLITE_FILE));
        assert_eq!(
            location.connection_string(),
            format!("Data Source={}", dir.join(DEFAULT_SQLITE_FILE).display())
        );
    }

    #[test]
    fn test_sqlite_location_set_database() {
        let tmp = tempfile::tempdir().unwrap();
        let mut location = SqliteLocation::new(Some(tmp.path().to_path_buf())).unwrap();

        location.set_database(Some("keys.db".to_string()));
        assert_eq!(location.database(), Some("keys.db"));

        location.set_database(None);
        assert_eq!(location.database(), Some(DEFAULT_SQLITE_FILE));
    }

    #[test]
    fn test_mysql_requires_credentials() {
        assert!(matches!(
            MySqlDescriptor::new("", "secret"),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            MySqlDescriptor::new("root", ""),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_mysql_connection_string_defaults() {
        let conn = MySqlDescriptor::new("app", "pw").unwrap();
        assert_eq!(
            conn.connection_string(),
            "Server=localhost;Port=3306;Database=ApiCore;User=app;Password=pw;"
        );
    }

    #[test]
    fn test_mysql_server_scope_omits_database() {
        let conn = MySqlDescriptor::new("app", "pw")
            .unwrap()
            .with_server("db.internal")
            .with_port(None);
        let scoped = conn.server_scope();

        assert_eq!(scoped.database(), None);
        assert_eq!(conn.database(), Some("ApiCore"));
        assert_eq!(
            scoped.connection_string(),
            "Server=db.internal;User=app;Password=pw;"
        );
    }

    #[test]
    fn test_mysql_server_connection() {
        let conn = MySqlDescriptor::server_connection("root", "pw", None, Some(3307)).unwrap();
        assert_eq!(conn.server(), "localhost");
        assert_eq!(conn.port(), Some(3307));
        assert_eq!(conn.database(), None);
        assert_eq!(conn.account_host(), "localhost");

        let remote = conn.with_server("10.0.0.5");
        assert_eq!(remote.account_host(), "%");
    }

    #[test]
    fn test_mysql_debug_redacts_password() {
        let conn = MySqlDescriptor::new("app", "hunter2").unwrap();
        let debug = format!("{:?}", conn);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_sqlserver_sql_auth_requires_credentials() {
        assert!(matches!(
            SqlServerAuth::sql(Some("sa".to_string()), None),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            SqlServerAuth::from_mode("sql", None, Some("pw".to_string())),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            SqlServerAuth::from_mode("kerberos-ish", None, None),
            Err(StoreError::Config(_))
        ));
        assert_eq!(
            SqlServerAuth::from_mode("Integrated", None, None).unwrap(),
            SqlServerAuth::Integrated
        );
    }

    #[test]
    fn test_sqlserver_connection_string_sql_auth() {
        let auth = SqlServerAuth::sql(Some("sa".to_string()), Some("pw".to_string())).unwrap();
        let conn = SqlServerDescriptor::new("localhost,1433", auth).unwrap();

        assert_eq!(
            conn.connection_string(),
            "Server=localhost,1433;Database=ApiCore;User Id=sa;Password=pw;TrustServerCertificate=True"
        );
    }

    #[cfg(windows)]
    #[test]
    fn test_sqlserver_connection_string_integrated_defaults_to_master() {
        let conn = SqlServerDescriptor::new("sql01", SqlServerAuth::Integrated)
            .unwrap()
            .with_database(None)
            .with_trust_server_certificate(false);

        assert_eq!(
            conn.connection_string(),
            "Server=sql01;Database=master;Integrated Security=True;Trusted_Connection=True;TrustServerCertificate=False"
        );
    }

    #[test]
    fn test_sqlserver_master_scope_keeps_original() {
        let auth = SqlServerAuth::sql(Some("sa".to_string()), Some("pw".to_string())).unwrap();
        let conn = SqlServerDescriptor::new("sql01", auth).unwrap();
        let master = conn.master_scope();

        assert_eq!(master.database(), Some("master"));
        assert_eq!(conn.database(), Some("ApiCore"));
    }

    #[test]
    fn test_sqlserver_requires_server() {
        assert!(matches!(
            SqlServerDescriptor::new("  ", SqlServerAuth::Integrated),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_sqlserver_tiberius_config_uses_sql_login() {
        let auth = SqlServerAuth::sql(Some("sa".to_string()), Some("pw".to_string())).unwrap();
        let conn = SqlServerDescriptor::new("localhost,1433", auth).unwrap();
        let config = format!("{:?}", conn.tiberius_config().unwrap());

        assert!(config.contains("SqlServer("));
        assert!(config.contains("user: \"sa\""));
    }

    #[cfg(windows)]
    #[test]
    fn test_sqlserver_tiberius_config_uses_integrated_login() {
        let conn = SqlServerDescriptor::new("sql01", SqlServerAuth::Integrated).unwrap();
        let config = format!("{:?}", conn.tiberius_config().unwrap());

        assert!(config.contains("Integrated"));
        assert!(!config.contains("SqlServer("));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_sqlserver_integrated_rejected_without_support() {
        assert!(matches!(
            SqlServerDescriptor::new("sql01", SqlServerAuth::Integrated),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_ado_value_quoting() {
        assert_eq!(ado_value("plain"), "plain");
        assert_eq!(ado_value("a;b"), "\"a;b\"");
        assert_eq!(ado_value("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
