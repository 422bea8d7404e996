//! HTTP transport.
//!
//! | Route | Auth | Workflow |
//! |-------|------|----------|
//! | `GET /health` | none | liveness |
//! | `POST /enroll` | none | vector-only registration, active scheme |
//! | `POST /search` | none | identify, active scheme |
//! | `POST /api/{version}/enroll?user_id=` | key | enrollment |
//! | `POST /api/{version}/attendance?device_id=` | key | fingerprint attendance |
//! | `POST /api/{version}/absent?device_id=` | key | alias of the above |
//! | `POST /api/{version}/attendance/qr?device_id=&code=` | key | badge attendance |
//! | `POST /api/{version}/enroll-mode` | key | device command |
//!
//! `{version}` selects the scheme (`v0`/`legacy`, `v1`, `v2`, or a canonical
//! scheme name).

mod auth;
mod handlers;

pub use auth::{API_KEY_HEADER, key_digest};
pub use handlers::ApiError;

use crate::services::ServiceContainer;
use crate::{Error, Result};
use axum::http::header;
use axum::routing::{get, post};
use axum::{Router, middleware};
use secrecy::ExposeSecret;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    services: ServiceContainer,
    api_key_digest: Option<[u8; 32]>,
}

impl AppState {
    /// Builds handler state, taking the API key from the container's config.
    #[must_use]
    pub fn new(services: ServiceContainer) -> Self {
        let api_key_digest = services
            .config()
            .server
            .api_key
            .as_ref()
            .map(|key| key_digest(key.expose_secret()));
        if api_key_digest.is_none() {
            tracing::warn!("No API key configured; every /api request will be rejected");
        }
        Self {
            services,
            api_key_digest,
        }
    }
}

/// Builds the application router.
#[must_use]
pub fn router(services: ServiceContainer) -> Router {
    let state = AppState::new(services);

    let api = Router::new()
        .route("/{version}/enroll", post(handlers::enroll))
        .route("/{version}/attendance", post(handlers::attend))
        .route("/{version}/absent", post(handlers::attend))
        .route("/{version}/attendance/qr", post(handlers::attend_by_code))
        .route("/{version}/enroll-mode", post(handlers::enroll_mode))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/enroll", post(handlers::register))
        .route("/search", post(handlers::search))
        .nest("/api", api)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            header::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the router on the configured listen address until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(services: ServiceContainer) -> Result<()> {
    let listen = services.config().server.listen.clone();
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| Error::operation("bind", format!("{listen}: {e}")))?;
    tracing::info!(listen = %listen, scheme = %services.active_scheme().id, "HTTP server listening");

    axum::serve(listener, router(services))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down HTTP server");
        })
        .await
        .map_err(|e| Error::operation("serve", e))
}
