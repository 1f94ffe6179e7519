use anyhow::Result;

use crate::api;
use crate::core::{AppConfig, Model};

pub async fn run(host: String, port: String, model: Option<Model>) -> Result<()> {
    let mut config = AppConfig::default();
    if let Some(model) = model {
        config.model = model;
    }
    api::serve(host, port, config).await
}
