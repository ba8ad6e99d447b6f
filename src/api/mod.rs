// REST surface: health check plus routes behind the API key gateway

use axum::{
    Extension, Router,
    http::StatusCode,
    middleware,
    response::Json,
    routing::get,
};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{ApiKeyContext, AuthGateway, require_api_key};

pub fn create_router(gateway: AuthGateway) -> Router {
    let protected = Router::new()
        .route("/api/whoami", get(whoami))
        .route_layer(middleware::from_fn_with_state(gateway, require_api_key));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// Bind `addr` and serve `router` until Ctrl-C.
pub async fn serve(addr: &str, router: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Echo the identity the gateway attached.
///
/// In development bypass there is no identity and `owner` is null.
async fn whoami(ctx: Option<Extension<ApiKeyContext>>) -> Json<Value> {
    match ctx {
        Some(Extension(ctx)) => Json(serde_json::json!({
            "authenticated": true,
            "owner": ctx.owner(),
            "keyType": ctx.key_type(),
        })),
        None => Json(serde_json::json!({
            "authenticated": false,
            "owner": null,
            "keyType": null,
        })),
    }
}
