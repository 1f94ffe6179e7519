//! Test utilities for integration tests
#![allow(dead_code)]

use std::sync::{Arc, RwLock};

use axum::{Router, body::Body};

use wittly::api::AppState;
use wittly::api::app;
use wittly::core::{AppConfig, Credential, Model};

pub type SharedState = Arc<RwLock<AppState>>;

/// Config pointing the completion endpoint at `api_hostname`,
/// usually a `mockito` server.
pub fn test_config(api_hostname: &str, api_key: Option<&str>) -> AppConfig {
    AppConfig {
        anthropic_api_hostname: api_hostname.to_string(),
        anthropic_api_key: api_key.map(Credential::new),
        model: Model::Claude37Sonnet,
        system_prompt_path: String::from("./system_prompt.txt"),
        system_message: String::from("You are Wittly, a helpful teaching assistant."),
    }
}

/// Creates a test application router along with its shared state so
/// tests can inspect or lock sessions directly.
pub fn test_app_with_state(api_hostname: &str, api_key: Option<&str>) -> (Router, SharedState) {
    let app_state = AppState::new(test_config(api_hostname, api_key));
    let shared_state = Arc::new(RwLock::new(app_state));
    (app(Arc::clone(&shared_state)), shared_state)
}

pub fn test_app(api_hostname: &str, api_key: Option<&str>) -> Router {
    test_app_with_state(api_hostname, api_key).0
}

pub async fn body_to_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8(bytes.to_vec()).expect("Body is not UTF-8")
}

/// Parses the JSON payloads out of a server-sent events body.
pub fn sse_events(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter_map(|data| serde_json::from_str(data).ok())
        .collect()
}

/// Anthropic style SSE body streaming `fragments` as text deltas.
pub fn anthropic_sse(fragments: &[&str]) -> String {
    let mut body = String::from(
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"role\":\"assistant\",\"content\":[]}}\n\n",
    );
    for fragment in fragments {
        let delta = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": fragment}
        });
        body.push_str(&format!("event: content_block_delta\ndata: {}\n\n", delta));
    }
    body.push_str("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
    body
}
