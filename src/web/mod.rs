//! HTTP surface: routes, handlers and session cookies.

pub mod handlers;
pub mod session;

use crate::components::google_calendar::TokenManager;
use crate::components::query_cache::QueryCacheManager;
use axum::{routing::get, Router};
use handlers::{
    calendar_events_handler, health_handler, index_handler, logout_handler,
    oauth2_callback_handler,
};
use session::SessionService;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    /// Cache engine answering event requests
    pub manager: QueryCacheManager,
    /// OAuth flow and access tokens
    pub tokens: TokenManager,
    /// Session cookie signing
    pub sessions: Arc<SessionService>,
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/calendar-events", get(calendar_events_handler))
        .route("/oauth2_callback", get(oauth2_callback_handler))
        .route("/logout", get(logout_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
