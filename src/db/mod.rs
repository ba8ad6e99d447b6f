//! Credential persistence: descriptors, the store contract, one store per
//! backend, and server administration.

pub mod admin;
pub mod connection;
pub mod error;
pub mod mysql;
pub mod schema;
pub mod sqlite;
pub mod sqlserver;
pub mod store;

pub use admin::{
    MySqlServerAdmin, ServerAdministrator, SqlServerAdmin, SqliteAdmin, UserPrivileges,
    server_admin,
};
pub use connection::{
    ConnectionDescriptor, HostedDescriptor, INTEGRATED_AUTH_SUPPORTED, MySqlDescriptor,
    SqlServerAuth, SqlServerDescriptor, SqliteLocation,
};
pub use error::StoreError;
pub use mysql::MySqlCredentialStore;
pub use schema::{
    BackendKind, CredentialRecord, DEFAULT_DATABASE_NAME, STANDARD_KEY_TYPE, ValidationResult,
};
pub use sqlite::SqliteCredentialStore;
pub use sqlserver::SqlServerCredentialStore;
pub use store::{BoxFuture, CredentialStore, StoreFactory};
