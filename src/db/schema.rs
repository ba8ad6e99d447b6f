use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{KeyHash, KeyOwner};

/// Key tier assigned when the caller does not ask for anything else.
///
/// Only one tier is in use today; the column exists so differentiated tiers
/// can be added without a schema change.
pub const STANDARD_KEY_TYPE: i32 = 0;

/// Default database (or file stem) used by every backend.
pub const DEFAULT_DATABASE_NAME: &str = "ApiCore";

/// Which relational engine backs a credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded, file-based SQLite.
    Sqlite,
    /// Hosted MySQL / MariaDB server.
    MySql,
    /// Hosted Microsoft SQL Server.
    SqlServer,
}

impl BackendKind {
    /// Stable lowercase name, used in config files and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::MySql => "mysql",
            Self::SqlServer => "sqlserver",
        }
    }

    /// Whether the backend is reached over the network.
    pub fn is_hosted(&self) -> bool {
        !matches!(self, Self::Sqlite)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlserver" | "mssql" | "sql" => Ok(Self::SqlServer),
            other => Err(format!("unknown backend kind: {}", other)),
        }
    }
}

/// Persisted representation of one API key.
///
/// Never carries the raw key; `hash` is unique across a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    /// Digest of the raw key.
    pub hash: KeyHash,
    /// Principal the key belongs to.
    pub owner: KeyOwner,
    /// Capability tier.
    pub key_type: i32,
    /// Inactive records never satisfy a lookup.
    pub is_active: bool,
    /// Optional human-facing label, not used for lookup.
    pub external_id: Option<String>,
    /// Assigned by the backend on insert.
    pub created_at: Option<DateTime<Utc>>,
}

/// Outcome of validating a presented key.
///
/// `is_valid == false` always comes with `owner == None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub owner: Option<KeyOwner>,
    pub key_type: i32,
}

impl ValidationResult {
    /// The single "no valid credential" answer, whether the key was unknown
    /// or inactive.
    pub fn invalid() -> Self {
        Self {
            is_valid: false,
            owner: None,
            key_type: STANDARD_KEY_TYPE,
        }
    }
}

impl From<Option<CredentialRecord>> for ValidationResult {
    fn from(record: Option<CredentialRecord>) -> Self {
        match record {
            Some(record) if record.is_active => Self {
                is_valid: true,
                owner: Some(record.owner),
                key_type: record.key_type,
            },
            _ => Self::invalid(),
        }
    }
}

/// Parse the `CreatedUtc` text column written by SQLite's `datetime('now')`.
pub(crate) fn parse_sqlite_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(is_active: bool) -> CredentialRecord {
        CredentialRecord {
            hash: KeyHash::new("ab".repeat(32)),
            owner: KeyOwner::new("alice"),
            key_type: 1,
            is_active,
            external_id: None,
            created_at: None,
        }
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("sqlite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!("MySQL".parse::<BackendKind>().unwrap(), BackendKind::MySql);
        assert_eq!("mssql".parse::<BackendKind>().unwrap(), BackendKind::SqlServer);
        assert!("postgres".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_backend_kind_hosted() {
        assert!(!BackendKind::Sqlite.is_hosted());
        assert!(BackendKind::MySql.is_hosted());
        assert!(BackendKind::SqlServer.is_hosted());
    }

    #[test]
    fn test_validation_from_active_record() {
        let result = ValidationResult::from(Some(record(true)));
        assert!(result.is_valid);
        assert_eq!(result.owner, Some(KeyOwner::new("alice")));
        assert_eq!(result.key_type, 1);
    }

    #[test]
    fn test_validation_inactive_equals_missing() {
        let inactive = ValidationResult::from(Some(record(false)));
        let missing = ValidationResult::from(None);
        assert_eq!(inactive, missing);
        assert!(!inactive.is_valid);
        assert!(inactive.owner.is_none());
    }

    #[test]
    fn test_validation_result_json_shape() {
        let json = serde_json::to_value(ValidationResult::invalid()).unwrap();
        assert_eq!(json["isValid"], false);
        assert!(json["owner"].is_null());
        assert_eq!(json["keyType"], 0);
    }

    #[test]
    fn test_parse_sqlite_timestamp() {
        let ts = parse_sqlite_timestamp("2026-01-02 03:04:05").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-02T03:04:05+00:00");
        assert!(parse_sqlite_timestamp("not a date").is_none());
    }
}
