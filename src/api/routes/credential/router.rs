//! Router for supplying the completion endpoint API key

use std::sync::{Arc, RwLock};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};

use super::public;
use crate::api::state::AppState;
use crate::core::Credential;

type SharedState = Arc<RwLock<AppState>>;

/// Set the API key used by sessions created from now on
async fn set_credential(
    State(state): State<SharedState>,
    Json(payload): Json<public::CredentialRequest>,
) -> Response {
    let api_key = Credential::new(&payload.api_key);
    if api_key.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "Please enter your Anthropic API key to continue.",
        )
            .into_response();
    }

    state
        .write()
        .expect("Unable to write shared state")
        .api_key = Some(api_key);
    tracing::info!("API key configured");

    StatusCode::NO_CONTENT.into_response()
}

pub fn router() -> Router<SharedState> {
    Router::new().route("/", post(set_credential))
}
