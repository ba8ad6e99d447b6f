//! `keygate.json` loading and construction of stores from it.
//!
//! ```json
//! {
//!   "backend": "mysql",
//!   "mysql": { "server": "db.internal", "user": "keygate", "password": "${KEYGATE_DB_PASSWORD}" },
//!   "gateway": { "environment": "production" }
//! }
//! ```

use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::auth::GatewayConfig;
use crate::db::{
    BackendKind, CredentialStore, HostedDescriptor, MySqlDescriptor, ServerAdministrator,
    SqlServerAuth, SqlServerDescriptor, SqliteCredentialStore, SqliteLocation, StoreError,
    StoreFactory, server_admin,
};

const CONFIG_FILE_NAME: &str = "keygate.json";

#[derive(Debug, Clone, Deserialize)]
pub struct KeygateConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    #[serde(default)]
    pub sqlite: SqliteSection,
    #[serde(default)]
    pub mysql: Option<MySqlSection>,
    #[serde(default)]
    pub sqlserver: Option<SqlServerSection>,
    #[serde(default)]
    pub gateway: GatewaySection,
}

fn default_backend() -> BackendKind {
    BackendKind::Sqlite
}

impl Default for KeygateConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sqlite: SqliteSection::default(),
            mysql: None,
            sqlserver: None,
            gateway: GatewaySection::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SqliteSection {
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Clone, Default, Deserialize)]
pub struct MySqlSection {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for MySqlSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlSection")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct SqlServerSection {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_sqlserver_authentication")]
    pub authentication: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub trust_server_certificate: Option<bool>,
}

fn default_sqlserver_authentication() -> String {
    "sql".to_string()
}

impl std::fmt::Debug for SqlServerSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlServerSection")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("authentication", &self.authentication)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("trust_server_certificate", &self.trust_server_certificate)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewaySection {
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

/// Locate `keygate.json`: `KEYGATE_CONFIG`, then
/// `$XDG_CONFIG_HOME/keygate/keygate.json`, then the working directory.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("KEYGATE_CONFIG") {
        return Some(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("keygate").join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let candidate = PathBuf::from(CONFIG_FILE_NAME);
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

fn expand_env_vars(input: &str) -> String {
    expand_with(input, |name| env::var(name).ok())
}

/// Replace `${NAME}` with `lookup(NAME)`; unknown names are left verbatim.
fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Some(val) = lookup(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_opt(value: &mut Option<String>) {
    if let Some(v) = value.as_mut() {
        *v = expand_env_vars(v);
    }
}

impl KeygateConfig {
    /// Load from `path`, or from the resolved default location.
    ///
    /// Without an explicit path and with no file found, the defaults apply
    /// (embedded backend in the platform data directory).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match resolve_config_path() {
                Some(p) => p,
                None => {
                    tracing::debug!("No {} found, using defaults", CONFIG_FILE_NAME);
                    return Ok(Self::default());
                }
            },
        };

        let raw = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let cfg = Self::from_json(&raw)?;
        tracing::info!(path = %path.display(), backend = %cfg.backend, "Loaded configuration");
        Ok(cfg)
    }

    /// Parse a JSON document and expand `${VAR}` references.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_json::from_str(raw)?;
        Ok(cfg.expanded())
    }

    fn expanded(mut self) -> Self {
        if let Some(dir) = self.sqlite.directory.take() {
            self.sqlite.directory = Some(PathBuf::from(expand_env_vars(&dir.to_string_lossy())));
        }
        expand_opt(&mut self.sqlite.file_name);

        if let Some(mysql) = self.mysql.as_mut() {
            expand_opt(&mut mysql.server);
            expand_opt(&mut mysql.database);
            expand_opt(&mut mysql.user);
            expand_opt(&mut mysql.password);
        }

        if let Some(sqlserver) = self.sqlserver.as_mut() {
            expand_opt(&mut sqlserver.server);
            expand_opt(&mut sqlserver.database);
            expand_opt(&mut sqlserver.user);
            expand_opt(&mut sqlserver.password);
            sqlserver.authentication = expand_env_vars(&sqlserver.authentication);
        }

        expand_opt(&mut self.gateway.header);
        expand_opt(&mut self.gateway.environment);
        self
    }

    /// Gateway settings; bypass only for the development environment.
    pub fn gateway_config(&self) -> GatewayConfig {
        let header = self.gateway.header.clone().unwrap_or_default();
        GatewayConfig::new(header).with_environment(self.gateway.environment.as_deref())
    }

    /// Embedded database location; creates the directory.
    pub fn sqlite_location(&self) -> Result<SqliteLocation, StoreError> {
        let location = SqliteLocation::new(self.sqlite.directory.clone())?;
        Ok(match &self.sqlite.file_name {
            Some(name) if !name.is_empty() => location.with_file_name(name.clone()),
            _ => location,
        })
    }

    pub fn mysql_descriptor(&self) -> Result<MySqlDescriptor, StoreError> {
        let section = self
            .mysql
            .as_ref()
            .ok_or_else(|| StoreError::config("missing `mysql` section"))?;

        let mut descriptor = MySqlDescriptor::new(
            section.user.clone().unwrap_or_default(),
            section.password.clone().unwrap_or_default(),
        )?;
        if let Some(server) = section.server.as_deref().filter(|s| !s.is_empty()) {
            descriptor = descriptor.with_server(server);
        }
        if section.port.is_some() {
            descriptor = descriptor.with_port(section.port);
        }
        if section.database.is_some() {
            descriptor = descriptor.with_database(section.database.clone());
        }
        Ok(descriptor)
    }

    pub fn sqlserver_descriptor(&self) -> Result<SqlServerDescriptor, StoreError> {
        let section = self
            .sqlserver
            .as_ref()
            .ok_or_else(|| StoreError::config("missing `sqlserver` section"))?;

        let auth = SqlServerAuth::from_mode(
            &section.authentication,
            section.user.clone(),
            section.password.clone(),
        )?;
        let mut descriptor =
            SqlServerDescriptor::new(section.server.clone().unwrap_or_default(), auth)?;
        if section.database.is_some() {
            descriptor = descriptor.with_database(section.database.clone());
        }
        if let Some(trust) = section.trust_server_certificate {
            descriptor = descriptor.with_trust_server_certificate(trust);
        }
        Ok(descriptor)
    }

    /// Descriptor for the configured hosted backend.
    pub fn hosted_descriptor(&self) -> Result<HostedDescriptor, StoreError> {
        match self.backend {
            BackendKind::Sqlite => Err(StoreError::UnsupportedBackend(BackendKind::Sqlite)),
            BackendKind::MySql => Ok(self.mysql_descriptor()?.into()),
            BackendKind::SqlServer => Ok(self.sqlserver_descriptor()?.into()),
        }
    }

    /// Credential store for the configured backend.
    ///
    /// Missing required values fail here, before any connection is tried.
    pub fn build_store(&self) -> Result<Arc<dyn CredentialStore>, StoreError> {
        match self.backend {
            BackendKind::Sqlite => Ok(Arc::new(SqliteCredentialStore::with_location(
                self.sqlite_location()?,
            ))),
            kind => StoreFactory::create_hosted(kind, self.hosted_descriptor()?),
        }
    }

    /// Server administrator for the configured hosted backend.
    pub fn build_admin(&self) -> Result<Arc<dyn ServerAdministrator>, StoreError> {
        Ok(server_admin(self.hosted_descriptor()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ConnectionDescriptor;

    #[test]
    fn test_expand_with_known_and_unknown() {
        let lookup = |name: &str| (name == "DB_PASS").then(|| "s3cret".to_string());

        assert_eq!(expand_with("${DB_PASS}", lookup), "s3cret");
        assert_eq!(expand_with("pre-${DB_PASS}-post", lookup), "pre-s3cret-post");
        assert_eq!(expand_with("${NOPE}", lookup), "${NOPE}");
        assert_eq!(expand_with("$DB_PASS", lookup), "$DB_PASS");
        assert_eq!(expand_with("no vars", lookup), "no vars");
    }

    #[test]
    fn test_defaults_to_sqlite() {
        let cfg = KeygateConfig::from_json("{}").unwrap();
        assert_eq!(cfg.backend, BackendKind::Sqlite);
        assert!(cfg.mysql.is_none());
        assert!(!cfg.gateway_config().is_bypass());
        assert_eq!(cfg.gateway_config().header(), "X-API-KEY");
    }

    #[test]
    fn test_sqlite_store_from_config() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = serde_json::json!({
            "backend": "sqlite",
            "sqlite": { "directory": tmp.path(), "file_name": "keys.db" }
        })
        .to_string();

        let cfg = KeygateConfig::from_json(&raw).unwrap();
        let store = cfg.build_store().unwrap();
        assert_eq!(store.backend(), BackendKind::Sqlite);
        assert_eq!(store.database_name().as_deref(), Some("keys.db"));
        assert!(matches!(
            cfg.build_admin(),
            Err(StoreError::UnsupportedBackend(BackendKind::Sqlite))
        ));
    }

    #[test]
    fn test_mysql_missing_credentials_fail_at_construction() {
        let cfg = KeygateConfig::from_json(r#"{ "backend": "mysql", "mysql": { "user": "app" } }"#)
            .unwrap();
        assert!(matches!(cfg.build_store(), Err(StoreError::Config(_))));

        let cfg = KeygateConfig::from_json(r#"{ "backend": "mysql" }"#).unwrap();
        assert!(matches!(cfg.build_store(), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_mysql_descriptor_from_config() {
        let cfg = KeygateConfig::from_json(
            r#"{ "backend": "mysql",
                 "mysql": { "server": "db.internal", "port": 3307, "database": "Keys",
                            "user": "app", "password": "pw" } }"#,
        )
        .unwrap();

        let descriptor = cfg.mysql_descriptor().unwrap();
        assert_eq!(
            descriptor.connection_string(),
            "Server=db.internal;Port=3307;Database=Keys;User=app;Password=pw;"
        );
        assert_eq!(cfg.build_admin().unwrap().backend(), BackendKind::MySql);
    }

    #[test]
    fn test_sqlserver_auth_modes_from_config() {
        let cfg = KeygateConfig::from_json(
            r#"{ "backend": "sqlserver", "sqlserver": { "server": "sql01", "authentication": "sql" } }"#,
        )
        .unwrap();
        assert!(matches!(cfg.build_store(), Err(StoreError::Config(_))));

        let cfg = KeygateConfig::from_json(
            r#"{ "backend": "sqlserver",
                 "sqlserver": { "server": "sql01", "authentication": "integrated",
                                "trust_server_certificate": false } }"#,
        )
        .unwrap();
        if crate::db::INTEGRATED_AUTH_SUPPORTED {
            let descriptor = cfg.sqlserver_descriptor().unwrap();
            assert_eq!(descriptor.auth(), &SqlServerAuth::Integrated);
            assert!(descriptor.connection_string().ends_with("TrustServerCertificate=False"));
            assert_eq!(descriptor.database(), Some("ApiCore"));
        } else {
            assert!(matches!(cfg.sqlserver_descriptor(), Err(StoreError::Config(_))));
        }
    }

    #[test]
    fn test_sqlserver_requires_server() {
        let cfg = KeygateConfig::from_json(
            r#"{ "backend": "sqlserver", "sqlserver": { "authentication": "integrated" } }"#,
        )
        .unwrap();
        assert!(matches!(cfg.sqlserver_descriptor(), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_gateway_environment() {
        let cfg = KeygateConfig::from_json(
            r#"{ "gateway": { "header": "X-Token", "environment": "Development" } }"#,
        )
        .unwrap();
        let gateway = cfg.gateway_config();
        assert!(gateway.is_bypass());
        assert_eq!(gateway.header(), "X-Token");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(KeygateConfig::from_json(r#"{ "backend": "postgres" }"#).is_err());
    }

    #[test]
    fn test_section_debug_redacts_password() {
        let cfg = KeygateConfig::from_json(
            r#"{ "mysql": { "user": "app", "password": "hunter2" } }"#,
        )
        .unwrap();
        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("hunter2"));
    }
}
