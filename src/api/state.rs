use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ai::chat::ChatSession;
use crate::anthropic::{AnthropicClient, CompletionEndpoint};
use crate::core::{AppConfig, Credential};

/// A session is locked for the whole duration of a streaming turn.
pub type SharedSession = Arc<Mutex<ChatSession>>;

pub struct AppState {
    pub config: AppConfig,
    // Every chat route is refused until this is set
    pub api_key: Option<Credential>,
    pub sessions: HashMap<Uuid, SharedSession>,
    pub endpoint: Arc<dyn CompletionEndpoint>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let endpoint = Arc::new(AnthropicClient::new(&config.anthropic_api_hostname));
        Self {
            api_key: config.anthropic_api_key.clone(),
            sessions: HashMap::new(),
            endpoint,
            config,
        }
    }

    /// The session and the endpoint its turns should stream from.
    pub fn session(&self, id: &Uuid) -> Option<(SharedSession, Arc<dyn CompletionEndpoint>)> {
        self.sessions
            .get(id)
            .map(|s| (Arc::clone(s), Arc::clone(&self.endpoint)))
    }
}
