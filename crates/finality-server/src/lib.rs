pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod state;
pub mod trial_loop;
pub mod world;
pub mod ws;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use finality_trial::StoreError;

use config::ServerConfig;
use state::AppState;

/// Build the Axum router and application state from a config.
///
/// Spawns the trial loop, so it must be called inside a tokio runtime.
pub fn build_app(config: ServerConfig) -> Result<(Router<()>, AppState), StoreError> {
    let request_timeout = config.limits.request_timeout();
    let state = AppState::new(config)?;

    // API routes (behind bearer auth middleware)
    let api_routes = Router::new()
        .route(
            "/admin/participants/{id}/reset",
            post(api::reset_participant),
        )
        .route("/admin/test-runs", post(api::start_test_run))
        .route("/status", get(api::get_status))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            bearer_auth_layer,
        ));

    // The host socket shares the admin token
    let host_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            bearer_auth_layer,
        ));

    let app = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .merge(host_routes)
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    Ok((app, state))
}

/// Middleware wrapper that injects AuthConfig into request extensions for the
/// bearer auth middleware.
async fn bearer_auth_layer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut request: axum::extract::Request,
    next: middleware::Next,
) -> Result<axum::response::Response, axum::http::StatusCode> {
    request.extensions_mut().insert(state.auth.clone());
    auth::bearer_auth_middleware(request.headers().clone(), request, next).await
}
