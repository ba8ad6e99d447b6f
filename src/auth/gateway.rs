//! Request-time API key enforcement.
//!
//! Every request is validated independently against the credential store;
//! nothing is cached between requests. A missing header answers 401, an
//! unknown or inactive key answers 403, and an accepted key leaves an
//! [`ApiKeyContext`] in the request extensions.

use std::fmt;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::auth::context::ApiKeyContext;
use crate::auth::hasher::hash_api_key;
use crate::db::store::CredentialStore;

/// Header carrying the raw key. Lookup is case-insensitive.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-KEY";

/// The only environment name that turns enforcement off.
pub const DEVELOPMENT_ENVIRONMENT: &str = "development";

/// Whether `environment` names the development environment.
pub fn is_development(environment: Option<&str>) -> bool {
    environment.is_some_and(|env| env.trim().eq_ignore_ascii_case(DEVELOPMENT_ENVIRONMENT))
}

/// Gateway settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    header: String,
    bypass: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            header: DEFAULT_API_KEY_HEADER.to_string(),
            bypass: false,
        }
    }
}

impl GatewayConfig {
    /// Enforcing configuration reading the key from `header`.
    pub fn new(header: impl Into<String>) -> Self {
        let header = header.into();
        Self {
            header: if header.trim().is_empty() {
                DEFAULT_API_KEY_HEADER.to_string()
            } else {
                header
            },
            bypass: false,
        }
    }

    /// Skip validation entirely when `environment` is development.
    pub fn with_environment(mut self, environment: Option<&str>) -> Self {
        self.bypass = is_development(environment);
        self
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn is_bypass(&self) -> bool {
        self.bypass
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayRejection {
    /// The key header was absent.
    MissingKey,
    /// No active credential matches the presented key.
    InvalidKey,
}

impl GatewayRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingKey => StatusCode::UNAUTHORIZED,
            Self::InvalidKey => StatusCode::FORBIDDEN,
        }
    }
}

impl fmt::Display for GatewayRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey => write!(f, "API Key is missing"),
            Self::InvalidKey => write!(f, "Invalid API Key"),
        }
    }
}

impl std::error::Error for GatewayRejection {}

impl IntoResponse for GatewayRejection {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Validates presented keys against a shared credential store.
#[derive(Clone)]
pub struct AuthGateway {
    store: Arc<dyn CredentialStore>,
    config: GatewayConfig,
}

impl AuthGateway {
    pub fn new(store: Arc<dyn CredentialStore>, config: GatewayConfig) -> Self {
        if config.is_bypass() {
            warn!("API key validation is disabled for the development environment");
        }
        Self { store, config }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Decide on one request from its headers.
    ///
    /// `Ok(None)` means the request is let through without an identity, which
    /// only happens in development bypass.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<ApiKeyContext>, GatewayRejection> {
        if self.config.bypass {
            return Ok(None);
        }

        let value = headers
            .get(self.config.header.as_str())
            .ok_or(GatewayRejection::MissingKey)?;

        // A header that is not visible ASCII cannot match any issued key.
        let raw_key = value.to_str().map_err(|_| GatewayRejection::InvalidKey)?;

        let hash = hash_api_key(raw_key);
        match ApiKeyContext::from_validation(self.store.validate(&hash).await) {
            Some(ctx) => {
                debug!(hash = %hash.short(), owner = %ctx.owner(), "API key accepted");
                Ok(Some(ctx))
            }
            None => {
                debug!(hash = %hash.short(), "API key rejected");
                Err(GatewayRejection::InvalidKey)
            }
        }
    }
}

/// axum middleware enforcing the gateway on every request it wraps.
///
/// Use with `axum::middleware::from_fn_with_state(gateway, require_api_key)`.
pub async fn require_api_key(
    State(gateway): State<AuthGateway>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, GatewayRejection> {
    if let Some(ctx) = gateway.authenticate(req.headers()).await? {
        req.extensions_mut().insert(ctx);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::SqliteCredentialStore;
    use axum::{Extension, Router, middleware, routing::get};
    use tower::ServiceExt;

    async fn gateway(config: GatewayConfig) -> (tempfile::TempDir, AuthGateway) {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteCredentialStore::new(Some(tmp.path().to_path_buf())).unwrap();
        assert!(store.initialize_schema().await);
        (tmp, AuthGateway::new(Arc::new(store), config))
    }

    fn app(gateway: AuthGateway) -> Router {
        Router::new()
            .route(
                "/protected",
                get(|ctx: Option<Extension<ApiKeyContext>>| async move {
                    match ctx {
                        Some(Extension(ctx)) => format!("{}:{}", ctx.owner(), ctx.key_type()),
                        None => "anonymous".to_string(),
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(gateway, require_api_key))
    }

    async fn call(app: Router, key: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri("/protected");
        if let Some(key) = key {
            builder = builder.header("X-API-KEY", key);
        }
        let resp = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_missing_header_is_401() {
        let (_tmp, gw) = gateway(GatewayConfig::default()).await;
        let (status, body) = call(app(gw), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "API Key is missing");
    }

    #[tokio::test]
    async fn test_unknown_key_is_403() {
        let (_tmp, gw) = gateway(GatewayConfig::default()).await;
        let (status, body) = call(app(gw), Some("not-a-key")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "Invalid API Key");
    }

    #[tokio::test]
    async fn test_stored_key_is_accepted_with_context() {
        let (_tmp, gw) = gateway(GatewayConfig::default()).await;
        assert!(gw.store().store_credential("abc123", "alice", 1).await);

        let (status, body) = call(app(gw), Some("abc123")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "alice:1");
    }

    #[tokio::test]
    async fn test_deactivated_key_is_403() {
        let (_tmp, gw) = gateway(GatewayConfig::default()).await;
        gw.store().store_credential("abc123", "alice", 1).await;
        assert!(gw.store().set_active(&hash_api_key("abc123"), false).await);

        let (status, body) = call(app(gw), Some("abc123")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "Invalid API Key");
    }

    #[tokio::test]
    async fn test_header_name_is_case_insensitive() {
        let (_tmp, gw) = gateway(GatewayConfig::default()).await;
        gw.store().store_credential("abc123", "alice", 0).await;

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "abc123".parse().unwrap());
        let ctx = gw.authenticate(&headers).await.unwrap().unwrap();
        assert_eq!(ctx.owner().as_str(), "alice");
    }

    #[tokio::test]
    async fn test_custom_header() {
        let (_tmp, gw) = gateway(GatewayConfig::new("X-Service-Token")).await;
        gw.store().store_credential("abc123", "alice", 0).await;

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "abc123".parse().unwrap());
        assert_eq!(
            gw.authenticate(&headers).await,
            Err(GatewayRejection::MissingKey)
        );

        headers.insert("x-service-token", "abc123".parse().unwrap());
        assert!(gw.authenticate(&headers).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_development_bypass() {
        let config = GatewayConfig::default().with_environment(Some("Development"));
        let (_tmp, gw) = gateway(config).await;

        let (status, body) = call(app(gw), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "anonymous");
    }

    #[test]
    fn test_bypass_requires_explicit_development() {
        assert!(!GatewayConfig::default().is_bypass());
        assert!(!GatewayConfig::default().with_environment(None).is_bypass());
        assert!(!GatewayConfig::default().with_environment(Some("production")).is_bypass());
        assert!(!GatewayConfig::default().with_environment(Some("dev")).is_bypass());
        assert!(GatewayConfig::default().with_environment(Some("DEVELOPMENT")).is_bypass());
    }

    #[test]
    fn test_rejection_responses() {
        assert_eq!(GatewayRejection::MissingKey.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayRejection::InvalidKey.into_response().status(), StatusCode::FORBIDDEN);
    }
}
