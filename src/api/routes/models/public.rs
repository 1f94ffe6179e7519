//! Public types for the models API
use serde::Serialize;

use crate::core::Model;

#[derive(Serialize)]
pub struct ModelInfo {
    pub id: Model,
    pub name: String,
}

#[derive(Serialize)]
pub struct ModelsResponse {
    pub default: Model,
    pub models: Vec<ModelInfo>,
}
