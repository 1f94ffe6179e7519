//! Public types for the chat API
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ai::chat::{Message, TurnState};
use crate::core::Model;

#[derive(Deserialize, Default)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub model: Option<Model>,
}

#[derive(Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    // Switches the session's model starting with this turn
    #[serde(default)]
    pub model: Option<Model>,
}

#[derive(Serialize)]
pub struct ChatSessionResponse {
    pub session_id: Uuid,
    pub model: Model,
    pub state: TurnState,
    /// Messages as shown to the user, without the introduction trigger
    pub messages: Vec<Message>,
}
