//! Router for listing the models a session can use

use std::sync::{Arc, RwLock};

use axum::{Json, Router, extract::State, routing::get};

use super::public;
use crate::api::state::AppState;
use crate::core::Model;

type SharedState = Arc<RwLock<AppState>>;

async fn list_models(State(state): State<SharedState>) -> Json<public::ModelsResponse> {
    let default = state.read().expect("Unable to read share state").config.model;
    let models = Model::ALL
        .into_iter()
        .map(|m| public::ModelInfo {
            id: m,
            name: m.display_name().to_string(),
        })
        .collect();

    Json(public::ModelsResponse { default, models })
}

pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(list_models))
}
