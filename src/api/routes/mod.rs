//! API routes module

pub mod chat;
pub mod credential;
pub mod models;

use std::sync::{Arc, RwLock};

use crate::api::state::AppState;
use axum::Router;

type SharedState = Arc<RwLock<AppState>>;

/// Create the combined API router
pub fn router(shared_state: SharedState) -> Router<SharedState> {
    Router::new()
        // Chat routes, refused until an API key is configured
        .nest("/chat", chat::router(shared_state))
        // Supplying the API key
        .nest("/credential", credential::router())
        // Selectable models
        .nest("/models", models::router())
}
