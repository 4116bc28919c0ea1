//! API Module
//!
//! HTTP surface of the orchestrator: webhook intake, extern deploys, and
//! a health probe. Each submodule handles endpoints for a specific domain.

pub mod deploy;
pub mod error;
pub mod health;
pub mod webhook;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use drydock_engine::lifecycle::ContainerLifecycle;
use drydock_engine::store::ContainerStore;
use drydock_engine::webhook::WebhookResolver;
use tower_http::trace::TraceLayer;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub containers: Arc<dyn ContainerStore>,
    pub lifecycle: Arc<ContainerLifecycle>,
    pub resolver: Arc<WebhookResolver>,
    pub api_token: Option<String>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // VCS webhook intake
        .route("/webhook", post(webhook::receive_webhook))
        // Manual deploys from external callers (CI, scripts)
        .route("/extern/{project_id}/deploy", post(deploy::extern_deploy))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
