// Core modules
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod types;

// Re-export key types and functions
pub use auth::{
    ApiKeyContext, AuthGateway, GatewayConfig, GatewayRejection, generate_api_key, hash_api_key,
    require_api_key,
};
pub use config::KeygateConfig;
pub use db::{
    BackendKind, CredentialRecord, CredentialStore, HostedDescriptor, ServerAdministrator,
    StoreError, StoreFactory, UserPrivileges, ValidationResult,
};
pub use types::{KeyHash, KeyOwner};
