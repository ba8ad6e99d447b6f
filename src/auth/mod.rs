//! API key hashing, request identity and the authentication gateway.
//!
//! ## Security Model
//!
//! - Raw keys are hashed with [`hash_api_key`] before they reach any store
//! - Only hashes are persisted; logs carry at most an 8-character prefix
//! - Unknown and inactive keys are rejected identically (403)
//! - Validation can be skipped only in the `development` environment
//!
//! ## Usage
//!
//! ```ignore
//! let gateway = AuthGateway::new(store, GatewayConfig::default());
//! let app = Router::new()
//!     .route("/api/whoami", get(whoami))
//!     .layer(middleware::from_fn_with_state(gateway, require_api_key));
//! ```

mod context;
mod gateway;
mod hasher;

pub use context::ApiKeyContext;
pub use gateway::{
    AuthGateway, DEFAULT_API_KEY_HEADER, DEVELOPMENT_ENVIRONMENT, GatewayConfig, GatewayRejection,
    is_development, require_api_key,
};
pub use hasher::{KEY_HASH_LEN, generate_api_key, hash_api_key};
