//! Router setup with all API routes and middleware.

use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use confab_core::error::ConfabError;

use crate::handlers;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::state::AppState;

/// Build the router: public health check, rate-limited protected routes and
/// the SSE stream, which is protected but not rate limited.
pub fn create_router(state: AppState) -> Router {
    // Local presentation layers on the API port or the next one up.
    let port = state.config.general.port;
    let origins: Vec<HeaderValue> = [port, port.saturating_add(1)]
        .iter()
        .flat_map(|p| {
            [
                format!("http://127.0.0.1:{}", p),
                format!("http://localhost:{}", p),
            ]
        })
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let public_routes = Router::new().route("/health", get(handlers::health));

    let limiter = RateLimiter::new(state.config.api.rate_limit_per_sec);

    let rate_limited_routes = Router::new()
        .route("/state", get(handlers::get_state))
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route("/sessions/{id}", put(handlers::rename_session))
        .route("/sessions/{id}/select", post(handlers::select_session))
        .route(
            "/messages",
            get(handlers::list_messages).post(handlers::submit),
        )
        .route("/messages/{id}", put(handlers::edit_message))
        .route("/regenerate", post(handlers::regenerate))
        .route("/models", get(handlers::list_models))
        .route("/model", get(handlers::get_model).put(handlers::set_model))
        .route(
            "/profile",
            get(handlers::get_profile)
                .put(handlers::update_profile)
                .layer(DefaultBodyLimit::max(64 * 1024)),
        )
        .route("/export", get(handlers::export))
        .layer(axum::middleware::from_fn(rate_limit_middleware))
        .layer(axum::Extension(limiter));

    let stream_routes = Router::new().route("/stream", get(handlers::stream));

    let protected_routes = rate_limited_routes.merge(stream_routes).route_layer(
        axum::middleware::from_fn_with_state(state.clone(), crate::auth::require_auth),
    );

    public_routes
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on 127.0.0.1 at the configured port until the process ends.
pub async fn start_server(state: AppState) -> Result<(), ConfabError> {
    let addr = SocketAddr::from(([127, 0, 0, 1], state.config.general.port));
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ConfabError::Api(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| ConfabError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
